//! Registered client entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "client")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub secret: String,
    /// Human-readable client name
    pub name: Option<String>,
    /// JSON array of registered redirect URIs
    pub redirect_uris: String,
    pub created_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parse redirect URIs from the JSON column
    pub fn redirect_uris_list(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_str(&self.redirect_uris)
    }
}
