use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{RegistryEntry, ServiceDefinition};

/// The service registry the agent keeps in sync.
///
/// `register` must behave as an upsert keyed on the service id, and `deregister`
/// of an id the registry does not know must succeed.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn register(&self, service: &ServiceDefinition) -> Result<()>;

    async fn deregister(&self, service_id: &str) -> Result<()>;

    /// Every service id currently registered, including ones this agent did not write.
    async fn list_service_ids(&self) -> Result<Vec<String>>;

    /// Id of the entry the registry keeps for itself.
    fn self_id(&self) -> &str;

    /// Registered ids paired with the workload each one was derived from,
    /// without the registry's own entry.
    async fn list_entries(&self) -> Result<Vec<RegistryEntry>> {
        let ids = self.list_service_ids().await?;
        let entries: BTreeSet<RegistryEntry> = ids
            .into_iter()
            .map(RegistryEntry::from_service_id)
            .filter(|entry| entry.workload_id != self.self_id())
            .collect();
        Ok(entries.into_iter().collect())
    }
}
