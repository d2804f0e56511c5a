use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EnvironmentVariables::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EnvironmentVariables::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(EnvironmentVariables::BotId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EnvironmentVariables::Key)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EnvironmentVariables::Value)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EnvironmentVariables::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_environment_variables_bot_id")
                            .from(
                                EnvironmentVariables::Table,
                                EnvironmentVariables::BotId,
                            )
                            .to(Bots::Table, Bots::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .index(
                        Index::create()
                            .name("idx_environment_variables_bot_id_key_unique")
                            .table(EnvironmentVariables::Table)
                            .col(EnvironmentVariables::BotId)
                            .col(EnvironmentVariables::Key)
                            .unique(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(EnvironmentVariables::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum EnvironmentVariables {
    Table,
    Id,
    BotId,
    Key,
    Value,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Bots {
    Table,
    Id,
}
