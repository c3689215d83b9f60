//! Provider Registry - the live directory of notification channels
//!
//! Maps provider id to the current instance. Mutations swap entries under the
//! write lock and close superseded instances after the lock is released, so a
//! lookup never returns an instance that has already been closed while mapped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::traits::{Provider, ProviderError, ProviderStatus};

/// Error types for ProviderRegistry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("provider not found: {0}")]
    NotFound(String),
    #[error("provider ID cannot be empty")]
    EmptyId,
    #[error("provider ID mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },
    #[error(transparent)]
    Close(#[from] ProviderError),
    #[error("failed to close {} provider(s): {}", .0.len(), join_errors(.0))]
    ClearFailed(Vec<ProviderError>),
}

fn join_errors(errors: &[ProviderError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

/// Registry of live provider instances
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a provider, superseding any instance with the same id
    pub fn register(&self, provider: Arc<dyn Provider>) -> Result<(), RegistryError> {
        let id = provider.id().to_string();
        if id.is_empty() {
            return Err(RegistryError::EmptyId);
        }

        let previous = self.providers.write().insert(id.clone(), provider);
        tracing::info!(provider_id = %id, replaced = previous.is_some(), "Registered provider");

        if let Some(old) = previous {
            close_superseded(&id, old);
        }
        Ok(())
    }

    /// Get a provider by ID
    pub fn get(&self, id: &str) -> Result<Arc<dyn Provider>, RegistryError> {
        self.providers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.read().contains_key(id)
    }

    /// Snapshot of all providers, sorted by id
    pub fn list(&self) -> Vec<Arc<dyn Provider>> {
        let mut providers: Vec<_> = self.providers.read().values().cloned().collect();
        providers.sort_by(|a, b| a.id().cmp(b.id()));
        providers
    }

    /// Swap the instance for `id`; the new provider must carry the same id
    pub fn replace(&self, id: &str, provider: Arc<dyn Provider>) -> Result<(), RegistryError> {
        if id.is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if provider.id() != id {
            return Err(RegistryError::IdMismatch {
                expected: id.to_string(),
                actual: provider.id().to_string(),
            });
        }

        let new_checksum = provider.config_checksum().to_string();
        let previous = self.providers.write().insert(id.to_string(), provider);

        match previous {
            Some(old) => {
                tracing::info!(
                    provider_id = %id,
                    old_checksum = %old.config_checksum(),
                    new_checksum = %new_checksum,
                    "Replaced provider"
                );
                close_superseded(id, old);
            }
            None => {
                tracing::info!(provider_id = %id, new_checksum = %new_checksum, "Registered provider on replace");
            }
        }
        Ok(())
    }

    /// Delete and close the provider for `id`
    pub fn remove(&self, id: &str) -> Result<(), RegistryError> {
        let removed = self
            .providers
            .write()
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        tracing::info!(provider_id = %id, "Removed provider");
        removed.close()?;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.providers.read().len()
    }

    /// Remove and close every provider, reporting all close failures
    pub fn clear(&self) -> Result<(), RegistryError> {
        let drained: Vec<(String, Arc<dyn Provider>)> = self.providers.write().drain().collect();

        let errors: Vec<ProviderError> = drained
            .into_iter()
            .filter_map(|(id, provider)| match provider.close() {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(provider_id = %id, error = %e, "Failed to close provider during clear");
                    Some(e)
                }
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::ClearFailed(errors))
        }
    }

    /// Probe every provider concurrently, outside the lock
    pub async fn statuses(&self) -> Vec<(String, ProviderStatus)> {
        let snapshot = self.list();
        let probes = snapshot.iter().map(|p| async move { (p.id().to_string(), p.status().await) });
        futures::future::join_all(probes).await
    }
}

fn close_superseded(id: &str, old: Arc<dyn Provider>) {
    if let Err(e) = old.close() {
        tracing::warn!(provider_id = %id, error = %e, "Failed to close superseded provider");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::TrackingProvider;
    use crate::traits::ProviderState;
    use std::thread;

    #[test]
    fn test_register_and_get() {
        let registry = ProviderRegistry::new();
        let p = Arc::new(TrackingProvider::new("ops", "c1"));
        registry.register(p.clone()).unwrap();

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get("ops").unwrap().config_checksum(), "c1");
        assert!(matches!(registry.get("nope"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_register_rejects_empty_id() {
        let registry = ProviderRegistry::new();
        let err = registry.register(Arc::new(TrackingProvider::new("", "c"))).unwrap_err();
        assert!(matches!(err, RegistryError::EmptyId));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_replace_rejects_empty_id() {
        let registry = ProviderRegistry::new();
        let err = registry.replace("", Arc::new(TrackingProvider::new("", "c"))).unwrap_err();
        assert!(matches!(err, RegistryError::EmptyId));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_register_supersedes_and_closes_previous() {
        let registry = ProviderRegistry::new();
        let first = Arc::new(TrackingProvider::new("ops", "c1"));
        let second = Arc::new(TrackingProvider::new("ops", "c2"));

        registry.register(first.clone()).unwrap();
        registry.register(second.clone()).unwrap();

        assert_eq!(registry.count(), 1);
        assert_eq!(first.close_count(), 1);
        assert_eq!(second.close_count(), 0);
        assert_eq!(registry.get("ops").unwrap().config_checksum(), "c2");
    }

    #[test]
    fn test_replace_closes_exactly_previous_instance_even_on_error() {
        let registry = ProviderRegistry::new();
        let first = Arc::new(TrackingProvider::new("ops", "c1").failing_close());
        let second = Arc::new(TrackingProvider::new("ops", "c2"));
        let third = Arc::new(TrackingProvider::new("ops", "c3"));

        registry.register(first.clone()).unwrap();
        registry.replace("ops", second.clone()).unwrap();
        registry.replace("ops", third.clone()).unwrap();

        assert_eq!(first.close_count(), 1);
        assert_eq!(second.close_count(), 1);
        assert_eq!(third.close_count(), 0);
        assert_eq!(registry.get("ops").unwrap().config_checksum(), "c3");
    }

    #[test]
    fn test_replace_id_mismatch() {
        let registry = ProviderRegistry::new();
        let original = Arc::new(TrackingProvider::new("ops", "c1"));
        registry.register(original.clone()).unwrap();

        let err = registry
            .replace("ops", Arc::new(TrackingProvider::new("other", "c2")))
            .unwrap_err();
        assert_eq!(err.to_string(), "provider ID mismatch: expected ops, got other");
        assert_eq!(original.close_count(), 0);
        assert_eq!(registry.get("ops").unwrap().config_checksum(), "c1");
    }

    #[test]
    fn test_remove() {
        let registry = ProviderRegistry::new();
        let p = Arc::new(TrackingProvider::new("ops", "c1"));
        registry.register(p.clone()).unwrap();

        registry.remove("ops").unwrap();
        assert_eq!(p.close_count(), 1);
        assert!(registry.get("ops").is_err());
        assert!(matches!(registry.remove("ops"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_remove_reports_close_error_but_still_deletes() {
        let registry = ProviderRegistry::new();
        registry
            .register(Arc::new(TrackingProvider::new("ops", "c1").failing_close()))
            .unwrap();

        assert!(matches!(registry.remove("ops"), Err(RegistryError::Close(_))));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_clear_aggregates_close_errors() {
        let registry = ProviderRegistry::new();
        let ok = Arc::new(TrackingProvider::new("a", "c"));
        let bad1 = Arc::new(TrackingProvider::new("b", "c").failing_close());
        let bad2 = Arc::new(TrackingProvider::new("c", "c").failing_close());
        registry.register(ok.clone()).unwrap();
        registry.register(bad1.clone()).unwrap();
        registry.register(bad2.clone()).unwrap();

        match registry.clear() {
            Err(RegistryError::ClearFailed(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregated error, got {:?}", other),
        }
        assert_eq!(registry.count(), 0);
        assert_eq!(ok.close_count(), 1);
        assert_eq!(bad1.close_count(), 1);
        assert_eq!(bad2.close_count(), 1);
    }

    #[test]
    fn test_list_is_a_sorted_snapshot() {
        let registry = ProviderRegistry::new();
        for id in ["zeta", "alpha", "mid"] {
            registry.register(Arc::new(TrackingProvider::new(id, "c"))).unwrap();
        }

        let snapshot = registry.list();
        registry.remove("mid").unwrap();

        let ids: Vec<&str> = snapshot.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn test_concurrent_replacements_leave_one_current_instance() {
        let registry = Arc::new(ProviderRegistry::new());
        let instances: Vec<Arc<TrackingProvider>> = (0..64)
            .map(|i| Arc::new(TrackingProvider::new("ops", &format!("c{}", i))))
            .collect();

        let handles: Vec<_> = instances
            .iter()
            .cloned()
            .map(|p| {
                let registry = registry.clone();
                thread::spawn(move || registry.replace("ops", p).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.count(), 1);
        let current = registry.get("ops").unwrap();
        assert!(!current.is_closed());
        let open: Vec<_> = instances.iter().filter(|p| p.close_count() == 0).collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].config_checksum(), current.config_checksum());
        assert!(instances.iter().all(|p| p.close_count() <= 1));
    }

    #[tokio::test]
    async fn test_statuses_probe_snapshot() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(TrackingProvider::new("b", "c2"))).unwrap();
        registry.register(Arc::new(TrackingProvider::new("a", "c1"))).unwrap();

        let statuses = registry.statuses().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].0, "a");
        assert_eq!(statuses[0].1.state, ProviderState::Active);
        assert_eq!(statuses[1].1.config_checksum, "c2");
    }
}
