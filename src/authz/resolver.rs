use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::principal::Principal;
use super::store::PermissionStore;
use crate::errors::AppResult;

type RoleSet = BTreeSet<String>;

/// Computes the policy strings granted by a set of roles.
///
/// Grants are additive: the result is the union over every role held. Unknown role names
/// contribute nothing. Without a cache every call reads the mapping rows afresh.
///
/// With a cache, `generation` is bumped by every [`invalidate`](Self::invalidate). A resolve
/// only stores its result if no invalidation happened since it started reading, so rows read
/// before a revoke never land in the cache after it was cleared.
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn PermissionStore>,
    cache: Option<Arc<RwLock<HashMap<RoleSet, HashSet<String>>>>>,
    generation: Arc<AtomicU64>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self {
            store,
            cache: None,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Resolver that memoizes results per role set until [`invalidate`](Self::invalidate).
    pub fn with_cache(store: Arc<dyn PermissionStore>) -> Self {
        Self {
            store,
            cache: Some(Arc::new(RwLock::new(HashMap::new()))),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn resolve(&self, principal: &Principal) -> AppResult<HashSet<String>> {
        self.resolve_roles(&principal.roles).await
    }

    pub async fn resolve_roles(&self, roles: &RoleSet) -> AppResult<HashSet<String>> {
        if roles.is_empty() {
            return Ok(HashSet::new());
        }

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.read().await.get(roles) {
                return Ok(hit.clone());
            }
        }

        let generation = self.generation.load(Ordering::Acquire);
        let rows = self.store.role_permission_mappings().await?;
        let resolved: HashSet<String> = rows
            .iter()
            .filter(|row| roles.contains(&row.role_name))
            .map(|row| row.policy_name())
            .collect();

        if let Some(cache) = &self.cache {
            let mut cache = cache.write().await;
            if self.generation.load(Ordering::Acquire) == generation {
                cache.insert(roles.clone(), resolved.clone());
            } else {
                tracing::debug!("permission cache invalidated during resolve; result not cached");
            }
        }

        Ok(resolved)
    }

    pub async fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            let mut cache = cache.write().await;
            self.generation.fetch_add(1, Ordering::AcqRel);
            if !cache.is_empty() {
                tracing::debug!(entries = cache.len(), "permission cache invalidated");
            }
            cache.clear();
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::store::testing::InMemoryStore;
    use crate::models::rbac::{CatalogEntry, RolePermissionMapping};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;
    use uuid::Uuid;

    fn roles(names: &[&str]) -> RoleSet {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|i| i.to_string()).collect()
    }

    fn store() -> Arc<InMemoryStore> {
        Arc::new(
            InMemoryStore::default()
                .grant("Editor", "Contacts", "Create")
                .grant("Viewer", "Contacts", "Read")
                .grant("Auditor", "Contacts", "Read")
                .grant("Auditor", "Users", "Read"),
        )
    }

    #[tokio::test]
    async fn resolves_single_role() {
        let resolver = PermissionResolver::new(store());
        let alice = Principal::new(Uuid::new_v4(), "alice").with_roles(vec!["Editor".to_string()]);

        assert_eq!(resolver.resolve(&alice).await.unwrap(), set(&["Contacts.CreatePolicy"]));
    }

    #[tokio::test]
    async fn union_of_roles_has_no_duplicates() {
        let resolver = PermissionResolver::new(store());
        let bob = Principal::new(Uuid::new_v4(), "bob")
            .with_roles(vec!["Editor".to_string(), "Viewer".to_string(), "Auditor".to_string()]);

        assert_eq!(
            resolver.resolve(&bob).await.unwrap(),
            set(&["Contacts.CreatePolicy", "Contacts.ReadPolicy", "Users.ReadPolicy"])
        );
    }

    #[tokio::test]
    async fn grants_are_additive() {
        let resolver = PermissionResolver::new(store());
        let all = ["Editor", "Viewer", "Auditor", "Ghost"];

        for (i, left) in all.iter().enumerate() {
            for right in &all[i..] {
                let r1 = resolver.resolve_roles(&roles(&[*left])).await.unwrap();
                let r2 = resolver.resolve_roles(&roles(&[*right])).await.unwrap();
                let both = resolver.resolve_roles(&roles(&[*left, *right])).await.unwrap();
                let union: HashSet<String> = r1.union(&r2).cloned().collect();
                assert_eq!(both, union, "{left} + {right}");
            }
        }
    }

    #[tokio::test]
    async fn unknown_and_missing_roles_resolve_to_nothing() {
        let resolver = PermissionResolver::new(store());

        assert!(resolver.resolve_roles(&roles(&["Ghost"])).await.unwrap().is_empty());
        assert!(resolver.resolve_roles(&roles(&[])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn role_names_are_case_sensitive() {
        let resolver = PermissionResolver::new(store());

        assert!(resolver.resolve_roles(&roles(&["editor"])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let resolver = PermissionResolver::new(store());
        let r = roles(&["Editor", "Auditor"]);

        let first = resolver.resolve_roles(&r).await.unwrap();
        let second = resolver.resolve_roles(&r).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn uncached_resolver_reads_every_time() {
        let store = store();
        let resolver = PermissionResolver::new(store.clone());
        let r = roles(&["Editor"]);

        resolver.resolve_roles(&r).await.unwrap();
        resolver.resolve_roles(&r).await.unwrap();
        assert_eq!(store.mapping_reads(), 2);
        assert!(!resolver.is_cached());
    }

    #[tokio::test]
    async fn cached_resolver_sees_revocation_after_invalidate() {
        let store = store();
        let resolver = PermissionResolver::with_cache(store.clone());
        let r = roles(&["Editor"]);

        assert!(resolver.resolve_roles(&r).await.unwrap().contains("Contacts.CreatePolicy"));
        store.revoke("Editor", "Contacts", "Create");

        // Still served from the cache until invalidated.
        assert!(resolver.resolve_roles(&r).await.unwrap().contains("Contacts.CreatePolicy"));
        assert_eq!(store.mapping_reads(), 1);

        resolver.invalidate().await;
        assert!(resolver.resolve_roles(&r).await.unwrap().is_empty());
        assert_eq!(store.mapping_reads(), 2);
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let store = store();
        store.set_failing(true);
        let resolver = PermissionResolver::new(store);

        assert!(resolver.resolve_roles(&roles(&["Editor"])).await.is_err());
    }

    /// Pauses the first mapping read after taking its snapshot, until `release` is notified.
    struct GatedStore {
        inner: Arc<InMemoryStore>,
        armed: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl GatedStore {
        fn new(inner: Arc<InMemoryStore>) -> Self {
            Self {
                inner,
                armed: AtomicBool::new(true),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl PermissionStore for GatedStore {
        async fn role_permission_mappings(&self) -> AppResult<Vec<RolePermissionMapping>> {
            let rows = self.inner.role_permission_mappings().await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(rows)
        }

        async fn permission_catalog(&self) -> AppResult<Vec<CatalogEntry>> {
            self.inner.permission_catalog().await
        }
    }

    #[tokio::test]
    async fn invalidate_during_resolve_discards_the_in_flight_result() {
        let inner = store();
        let gated = Arc::new(GatedStore::new(inner.clone()));
        let resolver = PermissionResolver::with_cache(gated.clone());
        let r = roles(&["Editor"]);

        let in_flight = tokio::spawn({
            let resolver = resolver.clone();
            let r = r.clone();
            async move { resolver.resolve_roles(&r).await }
        });

        // The read has its rows; revoke and invalidate before it finishes.
        gated.entered.notified().await;
        inner.revoke("Editor", "Contacts", "Create");
        resolver.invalidate().await;
        gated.release.notify_one();

        let old = in_flight.await.unwrap().unwrap();
        assert!(old.contains("Contacts.CreatePolicy"));

        assert!(resolver.resolve_roles(&r).await.unwrap().is_empty());
        assert_eq!(inner.mapping_reads(), 2);
    }
}
