use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::policy_name;
use super::store::PermissionStore;
use crate::errors::AppResult;

/// A single condition a policy imposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// The principal's resolved permission set must contain this policy string.
    Permission(String),
    /// The principal must hold at least one of these roles.
    Roles(BTreeSet<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    name: String,
    requirements: Vec<Requirement>,
}

impl Policy {
    /// Catalog policy: exactly one permission requirement carrying its own name.
    pub fn permission(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            requirements: vec![Requirement::Permission(name.clone())],
            name,
        }
    }

    pub fn roles(name: impl Into<String>, roles: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            requirements: vec![Requirement::Roles(roles.into_iter().collect())],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }
}

/// Explicit name → policy table.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, Policy>,
}

impl PolicyRegistry {
    pub fn insert(&mut self, policy: Policy) {
        self.policies.insert(policy.name.clone(), policy);
    }

    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Sorted policy names, for listings.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.policies.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyLookup {
    Permission(Policy),
    Fallback(Policy),
    Undefined,
}

/// Serves policies from the registry built from the permission catalog.
///
/// Names missing from the catalog fall back to the default registry; anything else is
/// `Undefined`. A failed refresh empties the catalog registry and marks it stale: lookups
/// deny catalog names and retry the refresh until one succeeds.
pub struct PolicyProvider {
    store: Arc<dyn PermissionStore>,
    catalog: RwLock<PolicyRegistry>,
    defaults: PolicyRegistry,
    stale: AtomicBool,
}

impl PolicyProvider {
    pub fn new(store: Arc<dyn PermissionStore>, defaults: PolicyRegistry) -> Self {
        Self {
            store,
            catalog: RwLock::new(PolicyRegistry::default()),
            defaults,
            stale: AtomicBool::new(true),
        }
    }

    /// Rebuilds the catalog registry from the store.
    pub async fn refresh(&self) -> AppResult<()> {
        let entries = match self.store.permission_catalog().await {
            Ok(entries) => entries,
            Err(err) => {
                *self.catalog.write().await = PolicyRegistry::default();
                self.stale.store(true, Ordering::Release);
                tracing::error!(error = %err, "failed to load permission catalog; permission policies disabled until reload");
                return Err(err);
            }
        };

        let mut registry = PolicyRegistry::default();
        for entry in &entries {
            registry.insert(Policy::permission(policy_name(&entry.page_name, &entry.operation_name)));
        }

        tracing::info!(policies = registry.len(), "policy registry loaded");
        *self.catalog.write().await = registry;
        self.stale.store(false, Ordering::Release);
        Ok(())
    }

    /// True until the catalog registry has been loaded, and again after a failed reload.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    pub async fn get_policy(&self, name: &str) -> PolicyLookup {
        if self.is_stale() {
            // A failure is logged by `refresh` and leaves catalog names undefined.
            let _ = self.refresh().await;
        }

        if let Some(policy) = self.catalog.read().await.get(name) {
            return PolicyLookup::Permission(policy.clone());
        }

        match self.defaults.get(name) {
            Some(policy) => PolicyLookup::Fallback(policy.clone()),
            None => PolicyLookup::Undefined,
        }
    }

    pub async fn catalog_policy_names(&self) -> Vec<String> {
        self.catalog.read().await.names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::store::testing::InMemoryStore;

    fn defaults() -> PolicyRegistry {
        let mut defaults = PolicyRegistry::default();
        defaults.insert(Policy::roles("AdministratorOnly", ["Administrator".to_string()]));
        defaults
    }

    async fn provider(store: Arc<InMemoryStore>) -> PolicyProvider {
        let provider = PolicyProvider::new(store, defaults());
        provider.refresh().await.unwrap();
        provider
    }

    fn catalog() -> Arc<InMemoryStore> {
        Arc::new(
            InMemoryStore::default()
                .page_operation("Contacts", "Create")
                .page_operation("Contacts", "Read"),
        )
    }

    #[tokio::test]
    async fn catalog_names_resolve_to_single_permission_requirement() {
        let provider = provider(catalog()).await;

        match provider.get_policy("Contacts.CreatePolicy").await {
            PolicyLookup::Permission(policy) => {
                assert_eq!(policy.name(), "Contacts.CreatePolicy");
                assert_eq!(
                    policy.requirements(),
                    &[Requirement::Permission("Contacts.CreatePolicy".to_string())]
                );
            }
            other => panic!("unexpected lookup {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_names_are_undefined() {
        let provider = provider(catalog()).await;

        assert_eq!(provider.get_policy("Reports.ExportPolicy").await, PolicyLookup::Undefined);
        assert_eq!(provider.get_policy("Contacts.Create").await, PolicyLookup::Undefined);
        assert_eq!(provider.get_policy("").await, PolicyLookup::Undefined);
    }

    #[tokio::test]
    async fn lookups_are_case_sensitive() {
        let provider = provider(catalog()).await;

        assert_eq!(provider.get_policy("contacts.createpolicy").await, PolicyLookup::Undefined);
        assert_eq!(provider.get_policy("Contacts.CREATEPolicy").await, PolicyLookup::Undefined);
    }

    #[tokio::test]
    async fn defaults_are_used_as_fallback() {
        let provider = provider(catalog()).await;

        assert!(matches!(
            provider.get_policy("AdministratorOnly").await,
            PolicyLookup::Fallback(_)
        ));
    }

    #[tokio::test]
    async fn refresh_picks_up_new_permissions() {
        let store = catalog();
        let provider = provider(store.clone()).await;
        assert_eq!(provider.get_policy("Contacts.DeletePolicy").await, PolicyLookup::Undefined);

        store.add_catalog_entry("Contacts", "Delete");
        provider.refresh().await.unwrap();

        assert!(matches!(
            provider.get_policy("Contacts.DeletePolicy").await,
            PolicyLookup::Permission(_)
        ));
    }

    #[tokio::test]
    async fn failed_refresh_clears_catalog_policies() {
        let store = catalog();
        let provider = provider(store.clone()).await;

        store.set_failing(true);
        assert!(provider.refresh().await.is_err());

        assert_eq!(provider.get_policy("Contacts.CreatePolicy").await, PolicyLookup::Undefined);
        assert!(provider.catalog_policy_names().await.is_empty());
        // Defaults do not depend on the store.
        assert!(matches!(
            provider.get_policy("AdministratorOnly").await,
            PolicyLookup::Fallback(_)
        ));
        assert!(provider.is_stale());
    }

    #[tokio::test]
    async fn stale_registry_reloads_on_next_lookup() {
        let store = catalog();
        let provider = provider(store.clone()).await;
        assert!(!provider.is_stale());

        store.set_failing(true);
        assert!(provider.refresh().await.is_err());
        assert_eq!(provider.get_policy("Contacts.ReadPolicy").await, PolicyLookup::Undefined);

        store.set_failing(false);
        assert!(matches!(
            provider.get_policy("Contacts.ReadPolicy").await,
            PolicyLookup::Permission(_)
        ));
        assert!(!provider.is_stale());
        assert_eq!(provider.catalog_policy_names().await.len(), 2);
    }
}
