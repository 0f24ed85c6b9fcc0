use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::errors::AppResult;
use crate::models::rbac::{CatalogEntry, RolePermissionMapping};

/// Read side of the role/permission tables consumed by the authorization core.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Every role → permission → page/operation row.
    async fn role_permission_mappings(&self) -> AppResult<Vec<RolePermissionMapping>>;

    /// Every page/operation combination that exists as a permission.
    async fn permission_catalog(&self) -> AppResult<Vec<CatalogEntry>>;
}

#[derive(Debug, Clone)]
pub struct SqlitePermissionStore {
    pool: SqlitePool,
}

impl SqlitePermissionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionStore for SqlitePermissionStore {
    async fn role_permission_mappings(&self) -> AppResult<Vec<RolePermissionMapping>> {
        // Inner joins: rows pointing at missing roles/permissions/pages/operations drop out here.
        // `integrity::find_orphans` is what reports them.
        let rows = sqlx::query_as::<_, RolePermissionMapping>(
            r#"
            SELECT r.id AS role_id, r.name AS role_name,
                   pg.id AS page_id, pg.name AS page_name, pg.url AS page_url,
                   o.id AS operation_id, o.name AS operation_name,
                   p.id AS permission_id
            FROM roles r
            INNER JOIN role_permissions rp ON rp.role_id = r.id
            INNER JOIN permissions p ON p.id = rp.permission_id
            INNER JOIN pages pg ON pg.id = p.page_id
            INNER JOIN operations o ON o.id = p.operation_id
            ORDER BY r.name, pg.display_order, o.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn permission_catalog(&self) -> AppResult<Vec<CatalogEntry>> {
        let rows = sqlx::query_as::<_, CatalogEntry>(
            r#"
            SELECT pg.name AS page_name, o.name AS operation_name
            FROM permissions p
            INNER JOIN pages pg ON pg.id = p.page_id
            INNER JOIN operations o ON o.id = p.operation_id
            ORDER BY pg.display_order, o.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use uuid::Uuid;

    use super::*;
    use crate::errors::AppError;

    /// Store double backed by plain vectors. `failing()` turns every read into a database error.
    #[derive(Default)]
    pub struct InMemoryStore {
        mappings: Mutex<Vec<RolePermissionMapping>>,
        catalog: Mutex<Vec<CatalogEntry>>,
        fail: AtomicBool,
        mapping_reads: AtomicUsize,
    }

    impl InMemoryStore {
        pub fn grant(self, role: &str, page: &str, operation: &str) -> Self {
            self.add_grant(role, page, operation);
            self
        }

        pub fn page_operation(self, page: &str, operation: &str) -> Self {
            self.add_catalog_entry(page, operation);
            self
        }

        pub fn failing(self) -> Self {
            self.fail.store(true, Ordering::SeqCst);
            self
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn add_grant(&self, role: &str, page: &str, operation: &str) {
            self.add_catalog_entry(page, operation);
            self.mappings.lock().unwrap().push(RolePermissionMapping {
                role_id: Uuid::new_v4(),
                role_name: role.to_string(),
                page_id: Uuid::new_v4(),
                page_name: page.to_string(),
                page_url: format!("/{}", page.to_lowercase()),
                operation_id: Uuid::new_v4(),
                operation_name: operation.to_string(),
                permission_id: Uuid::new_v4(),
            });
        }

        pub fn revoke(&self, role: &str, page: &str, operation: &str) {
            self.mappings.lock().unwrap().retain(|m| {
                !(m.role_name == role && m.page_name == page && m.operation_name == operation)
            });
        }

        pub fn add_catalog_entry(&self, page: &str, operation: &str) {
            let mut catalog = self.catalog.lock().unwrap();
            if !catalog.iter().any(|c| c.page_name == page && c.operation_name == operation) {
                catalog.push(CatalogEntry {
                    page_name: page.to_string(),
                    operation_name: operation.to_string(),
                });
            }
        }

        pub fn mapping_reads(&self) -> usize {
            self.mapping_reads.load(Ordering::SeqCst)
        }

        fn check(&self) -> AppResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PermissionStore for InMemoryStore {
        async fn role_permission_mappings(&self) -> AppResult<Vec<RolePermissionMapping>> {
            self.check()?;
            self.mapping_reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.mappings.lock().unwrap().clone())
        }

        async fn permission_catalog(&self) -> AppResult<Vec<CatalogEntry>> {
            self.check()?;
            Ok(self.catalog.lock().unwrap().clone())
        }
    }
}
