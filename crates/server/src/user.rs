//! Caller identity as seen by the API: a row of the `users` table.

use engine::Role;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub display_name: String,
    pub role: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Admin and finance users see every donation.
    pub fn is_staff(&self) -> bool {
        Role::try_from(self.role.as_str()).is_ok_and(Role::is_staff)
    }
}
