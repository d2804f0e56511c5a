use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "bots")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub runtime: String,
    pub status: String,
    pub zip_archive_path: Option<String>,
    /// Absolute path of the manifest directory (the install root).
    pub bot_directory: Option<String>,
    /// Relative to `bot_directory`.
    pub entry_point: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id"
    )]
    Users,
    #[sea_orm(has_many = "super::environment_variables::Entity")]
    EnvironmentVariables,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl Related<super::environment_variables::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EnvironmentVariables.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
