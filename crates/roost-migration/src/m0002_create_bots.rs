use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Bots::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Bots::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Bots::UserId).uuid().not_null())
                    .col(ColumnDef::new(Bots::Name).string().not_null())
                    .col(ColumnDef::new(Bots::Runtime).string().not_null())
                    .col(
                        ColumnDef::new(Bots::Status)
                            .string()
                            .not_null()
                            .default("stopped"),
                    )
                    .col(ColumnDef::new(Bots::ZipArchivePath).string().null())
                    .col(ColumnDef::new(Bots::BotDirectory).string().null())
                    .col(ColumnDef::new(Bots::EntryPoint).string().null())
                    .col(ColumnDef::new(Bots::ErrorMessage).string().null())
                    .col(
                        ColumnDef::new(Bots::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Bots::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bots_user_id")
                            .from(Bots::Table, Bots::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .index(
                        Index::create()
                            .name("idx_bots_user_id_name_unique")
                            .table(Bots::Table)
                            .col(Bots::UserId)
                            .col(Bots::Name)
                            .unique(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_bots_user_id")
                    .table(Bots::Table)
                    .col(Bots::UserId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Bots::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Bots {
    Table,
    Id,
    UserId,
    Name,
    Runtime,
    Status,
    ZipArchivePath,
    BotDirectory,
    EntryPoint,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
