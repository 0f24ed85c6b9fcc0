//! Referential integrity pass over the RBAC join tables.
//!
//! The resolver's inner joins silently skip rows that point at missing records. This pass
//! reports them instead so administrators can see what the join dropped.

use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct IntegrityIssue {
    /// Table holding the dangling reference
    #[schema(example = "role_permissions")]
    pub table: String,
    /// Column whose value has no matching row
    #[schema(example = "permission_id")]
    pub column: String,
    pub row_key: Uuid,
    pub missing_id: Uuid,
}

struct OrphanQuery {
    table: &'static str,
    column: &'static str,
    sql: &'static str,
}

const ORPHAN_QUERIES: &[OrphanQuery] = &[
    OrphanQuery {
        table: "role_permissions",
        column: "role_id",
        sql: "SELECT rp.permission_id AS row_key, rp.role_id AS missing_id FROM role_permissions rp LEFT JOIN roles r ON r.id = rp.role_id WHERE r.id IS NULL",
    },
    OrphanQuery {
        table: "role_permissions",
        column: "permission_id",
        sql: "SELECT rp.role_id AS row_key, rp.permission_id AS missing_id FROM role_permissions rp LEFT JOIN permissions p ON p.id = rp.permission_id WHERE p.id IS NULL",
    },
    OrphanQuery {
        table: "permissions",
        column: "page_id",
        sql: "SELECT p.id AS row_key, p.page_id AS missing_id FROM permissions p LEFT JOIN pages pg ON pg.id = p.page_id WHERE pg.id IS NULL",
    },
    OrphanQuery {
        table: "permissions",
        column: "operation_id",
        sql: "SELECT p.id AS row_key, p.operation_id AS missing_id FROM permissions p LEFT JOIN operations o ON o.id = p.operation_id WHERE o.id IS NULL",
    },
    OrphanQuery {
        table: "user_roles",
        column: "user_id",
        sql: "SELECT ur.role_id AS row_key, ur.user_id AS missing_id FROM user_roles ur LEFT JOIN users u ON u.id = ur.user_id WHERE u.id IS NULL",
    },
    OrphanQuery {
        table: "user_roles",
        column: "role_id",
        sql: "SELECT ur.user_id AS row_key, ur.role_id AS missing_id FROM user_roles ur LEFT JOIN roles r ON r.id = ur.role_id WHERE r.id IS NULL",
    },
];

pub async fn find_orphans(pool: &SqlitePool) -> AppResult<Vec<IntegrityIssue>> {
    let mut issues = Vec::new();

    for query in ORPHAN_QUERIES {
        let rows = sqlx::query_as::<_, (Uuid, Uuid)>(query.sql).fetch_all(pool).await?;
        issues.extend(rows.into_iter().map(|(row_key, missing_id)| IntegrityIssue {
            table: query.table.to_string(),
            column: query.column.to_string(),
            row_key,
            missing_id,
        }));
    }

    Ok(issues)
}

/// Runs the pass and logs each issue. Returns the number found.
pub async fn report_orphans(pool: &SqlitePool) -> AppResult<usize> {
    let issues = find_orphans(pool).await?;

    for issue in &issues {
        tracing::warn!(
            table = %issue.table,
            column = %issue.column,
            row_key = %issue.row_key,
            missing_id = %issue.missing_id,
            "dangling RBAC reference; row is ignored by permission resolution"
        );
    }

    Ok(issues.len())
}
