use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One mining worker as reported at authorization, keyed by
/// `(puid, worker_id)`. Name and agent are last-write-wins.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "workers")]
pub struct Model {
    /// Pool user id from the user API
    #[sea_orm(primary_key, auto_increment = false)]
    pub puid: i32,
    /// Worker id derived by the session layer, stable across reconnects
    #[sea_orm(primary_key, auto_increment = false)]
    pub worker_id: i64,
    pub name: String,
    pub agent: String,
    pub created_at: ChronoDateTime,
    pub updated_at: ChronoDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
