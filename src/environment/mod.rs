//! Environment registry (spec §4.1).
//!
//! Process-wide, read-only after construction. Holds one database client and
//! one storage client per configured environment. Grounded on the teacher's
//! ambient-singleton-to-explicit-registry rewrite described in spec §9
//! ("Ambient supabase client ... -> an `EnvironmentRegistry` passed into workers").

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::models::EnvironmentName;
use crate::repository::{DieselRepositories, Repositories};
use crate::storage::{S3StorageClient, StorageClient};

/// Everything one environment needs: its database-backed repositories and
/// its object storage client.
pub struct EnvironmentHandle {
    pub name: EnvironmentName,
    pub repositories: Arc<dyn Repositories>,
    pub storage: Arc<dyn StorageClient>,
}

/// Read-only, process-wide registry of configured environments (spec §4.1).
///
/// `get_database_client`/`get_storage_client` return `None` for an absent
/// environment; callers must skip it, never fail (spec §4.1).
pub struct EnvironmentRegistry {
    handles: HashMap<EnvironmentName, EnvironmentHandle>,
    order: Vec<EnvironmentName>,
}

impl EnvironmentRegistry {
    /// Build the registry from configuration. Connecting eagerly here (rather
    /// than lazily per-call) matches the teacher's "initialized once" contract
    /// and lets a misconfigured environment be diagnosed at startup.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let mut handles = HashMap::new();

        for (name, env_config) in &config.environments {
            let Some(env_name) = EnvironmentName::parse(name) else {
                tracing::warn!(environment = %name, "skipping unknown environment name");
                continue;
            };

            let repositories: Arc<dyn Repositories> =
                Arc::new(DieselRepositories::connect(&env_config.database_url).await?);
            let storage: Arc<dyn StorageClient> =
                Arc::new(S3StorageClient::new(env_config).await?);

            handles.insert(
                env_name,
                EnvironmentHandle {
                    name: env_name,
                    repositories,
                    storage,
                },
            );
        }

        Ok(Self {
            handles,
            order: config.environment_order(),
        })
    }

    /// Environments in configured claim-priority order (spec §4.2), filtered
    /// to those actually present in the registry.
    pub fn list_environments(&self) -> Vec<EnvironmentName> {
        self.order
            .iter()
            .copied()
            .filter(|e| self.handles.contains_key(e))
            .collect()
    }

    pub fn get(&self, name: EnvironmentName) -> Option<&EnvironmentHandle> {
        self.handles.get(&name)
    }

    pub fn get_database_client(&self, name: EnvironmentName) -> Option<Arc<dyn Repositories>> {
        self.handles.get(&name).map(|h| h.repositories.clone())
    }

    pub fn get_storage_client(&self, name: EnvironmentName) -> Option<Arc<dyn StorageClient>> {
        self.handles.get(&name).map(|h| h.storage.clone())
    }
}
