#![allow(dead_code)]

use std::path::Path;

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use contacts_api::config::AuthzSettings;
use contacts_api::create_app_with;
use contacts_api::jwt::JwtConfig;

pub const PASSWORD: &str = "password123";

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    _dir: TempDir,
}

impl TestApp {
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with(AuthzSettings::default()).await
    }

    pub async fn spawn_with(settings: AuthzSettings) -> Result<Self> {
        let dir = tempfile::tempdir().context("failed to create tempdir")?;
        let pool = migrated_pool(&dir, 5).await?;

        let jwt = JwtConfig::new("test-secret", 1);
        let app = create_app_with(pool.clone(), jwt, settings).await?;

        Ok(Self {
            app,
            pool,
            _dir: dir,
        })
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }

        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let resp = self.app.clone().oneshot(req).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };

        Ok((status, value))
    }

    pub async fn get(&self, uri: &str, token: &str) -> Result<(StatusCode, Value)> {
        self.request(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> Result<(StatusCode, Value)> {
        self.request(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> Result<(StatusCode, Value)> {
        self.request(Method::PUT, uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> Result<(StatusCode, Value)> {
        self.request(Method::DELETE, uri, Some(token), None).await
    }

    /// Registers `username`, links it to `roles` (creating missing roles) and logs in.
    pub async fn user_with_roles(&self, username: &str, roles: &[&str]) -> Result<(Uuid, String)> {
        let (status, body) = self
            .request(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({
                    "first_name": username,
                    "last_name": "Tester",
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": PASSWORD
                })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");

        let user_id: Uuid = body["user"]["id"]
            .as_str()
            .context("missing user id")?
            .parse()?;

        for role in roles {
            let role_id = self.ensure_role(role).await?;
            sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id, created_on) VALUES (?, ?, ?)")
                .bind(user_id)
                .bind(role_id)
                .bind(chrono::Utc::now())
                .execute(&self.pool)
                .await?;
        }

        let token = self.login(username).await?;
        Ok((user_id, token))
    }

    pub async fn admin(&self) -> Result<String> {
        let (_, token) = self.user_with_roles("admin", &["Administrator"]).await?;
        Ok(token)
    }

    pub async fn login(&self, username: &str) -> Result<String> {
        let (status, body) = self
            .request(
                Method::POST,
                "/auth/login",
                None,
                Some(json!({ "login": username, "password": PASSWORD })),
            )
            .await?;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");

        Ok(body["token"].as_str().context("missing token")?.to_string())
    }

    pub async fn ensure_role(&self, name: &str) -> Result<Uuid> {
        if let Some(id) = sqlx::query_scalar::<_, Uuid>("SELECT id FROM roles WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(id);
        }

        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO roles (id, name, created_on) VALUES (?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(chrono::Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn permission_id(&self, page: &str, operation: &str) -> Result<Uuid> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT p.id FROM permissions p \
             INNER JOIN pages pg ON pg.id = p.page_id \
             INNER JOIN operations o ON o.id = p.operation_id \
             WHERE pg.name = ? AND o.name = ?",
        )
        .bind(page)
        .bind(operation)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("no permission {page}.{operation}"))
    }

    /// Direct grant through the database, bypassing the admin API.
    pub async fn grant(&self, role: &str, page: &str, operation: &str) -> Result<()> {
        let role_id = self.ensure_role(role).await?;
        let permission_id = self.permission_id(page, operation).await?;
        sqlx::query(
            "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_on) VALUES (?, ?, ?)",
        )
        .bind(role_id)
        .bind(permission_id)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub async fn migrated_pool(dir: &TempDir, max_connections: u32) -> Result<SqlitePool> {
    let db_path = dir.path().join("test.db");
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await?;

    let migrator =
        sqlx::migrate::Migrator::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    Ok(pool)
}

/// Polls until the activity listener has written `event_name`.
pub async fn wait_for_event(pool: &SqlitePool, event_name: &str) -> Result<i64> {
    for _ in 0..50 {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM activity_log WHERE event_name = ?")
            .bind(event_name)
            .fetch_one(pool)
            .await?;
        if count > 0 {
            return Ok(count);
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    anyhow::bail!("event {event_name} was never written")
}
