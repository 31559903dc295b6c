use super::{Client, ClientRegistryError, ClientRepo, validate_clients};
use crate::error::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// In-memory client registry, typically built from the static configuration.
#[derive(Clone, Default)]
pub struct MemClientRepo {
    clients: Arc<DashMap<String, Client>>,
}

impl MemClientRepo {
    pub fn from_clients(clients: Vec<Client>) -> Result<Self, ClientRegistryError> {
        validate_clients(&clients)?;
        let map = DashMap::with_capacity(clients.len());
        for client in clients {
            map.insert(client.id.clone(), client);
        }
        Ok(Self {
            clients: Arc::new(map),
        })
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl ClientRepo for MemClientRepo {
    async fn get(&self, id: &str) -> Result<Option<Client>, StorageError> {
        Ok(self.clients.get(id).map(|c| c.value().clone()))
    }
}
