use super::{Client, ClientRepo};
use crate::entity::client;
use crate::error::StorageError;
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection, EntityTrait};
use std::sync::Arc;
use time::OffsetDateTime;
use url::Url;

/// Database-backed client registry.
#[derive(Clone)]
pub struct DbClientRepo {
    db: Arc<DatabaseConnection>,
}

impl DbClientRepo {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Applies pending schema migrations.
    #[tracing::instrument(skip(self))]
    pub async fn install_schema(&self) -> Result<(), StorageError> {
        Migrator::up(self.db.as_ref(), None).await?;
        Ok(())
    }

    /// Registers a client. The client must already be validated.
    #[tracing::instrument(skip(self, client), fields(client_id = %client.id))]
    pub async fn insert(&self, client: &Client) -> Result<(), StorageError> {
        if client::Entity::find_by_id(client.id.clone())
            .one(self.db.as_ref())
            .await?
            .is_some()
        {
            return Err(StorageError::Conflict(client.id.clone()));
        }

        let uris: Vec<&str> = client.redirect_uris.iter().map(Url::as_str).collect();
        let redirect_uris = serde_json::to_string(&uris).map_err(|e| StorageError::Corrupt {
            id: client.id.clone(),
            reason: e.to_string(),
        })?;

        let model = client::ActiveModel {
            id: Set(client.id.clone()),
            secret: Set(client.secret.clone()),
            name: Set(client.name.clone()),
            redirect_uris: Set(redirect_uris),
            created_at: Set(OffsetDateTime::now_utc()),
        };
        model.insert(self.db.as_ref()).await?;
        Ok(())
    }

    /// Inserts every client that is not registered yet; returns how many were added.
    pub async fn seed(&self, clients: &[Client]) -> Result<usize, StorageError> {
        let mut added = 0;
        for c in clients {
            match self.insert(c).await {
                Ok(()) => added += 1,
                Err(StorageError::Conflict(id)) => {
                    tracing::debug!(client_id = %id, "Client already registered, skipping seed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }
}

fn from_model(model: client::Model) -> Result<Client, StorageError> {
    let corrupt = |reason: String| StorageError::Corrupt {
        id: model.id.clone(),
        reason,
    };
    let redirect_uris = model
        .redirect_uris_list()
        .map_err(|e| corrupt(e.to_string()))?
        .iter()
        .map(|u| Url::parse(u).map_err(|e| corrupt(format!("{u}: {e}"))))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Client {
        id: model.id,
        secret: model.secret,
        name: model.name,
        redirect_uris,
    })
}

#[async_trait]
impl ClientRepo for DbClientRepo {
    async fn get(&self, id: &str) -> Result<Option<Client>, StorageError> {
        match client::Entity::find_by_id(id.to_string())
            .one(self.db.as_ref())
            .await?
        {
            Some(model) => from_model(model).map(Some),
            None => Ok(None),
        }
    }
}
