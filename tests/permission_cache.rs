mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use common::TestApp;
use contacts_api::config::AuthzSettings;

fn cached() -> AuthzSettings {
    AuthzSettings {
        permission_cache: true,
    }
}

#[tokio::test]
async fn admin_changes_invalidate_cached_permission_sets() -> Result<()> {
    let app = TestApp::spawn_with(cached()).await?;
    let admin = app.admin().await?;
    let (_, alice) = app.user_with_roles("alice", &["Editor"]).await?;
    let role_id = app.ensure_role("Editor").await?;
    let read = app.permission_id("Contacts", "Read").await?;

    // Populates the cache with an empty set for {Editor}.
    let (status, _) = app.get("/contacts", &alice).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post(
            &format!("/rbac/roles/{role_id}/permissions"),
            &admin,
            json!({ "permission_ids": [read] }),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app.get("/contacts", &alice).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .put(
            &format!("/rbac/roles/{role_id}/permissions"),
            &admin,
            json!({ "permission_ids": [] }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get("/contacts", &alice).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn out_of_band_writes_stay_invisible_until_invalidated() -> Result<()> {
    let app = TestApp::spawn_with(cached()).await?;
    let (_, alice) = app.user_with_roles("alice", &["Editor"]).await?;

    let (status, _) = app.get("/contacts", &alice).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Bypasses the admin API, so nothing invalidates the cache.
    app.grant("Editor", "Contacts", "Read").await?;

    let (status, _) = app.get("/contacts", &alice).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Any catalog change flushes every cached entry.
    let admin = app.admin().await?;
    let (status, _) = app
        .post("/rbac/operations", &admin, json!({ "name": "Export" }))
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app.get("/contacts", &alice).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn creating_a_page_flushes_cached_permission_sets() -> Result<()> {
    let app = TestApp::spawn_with(cached()).await?;
    let admin = app.admin().await?;
    let (_, alice) = app.user_with_roles("alice", &["Editor"]).await?;

    let (status, _) = app.get("/contacts", &alice).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.grant("Editor", "Contacts", "Read").await?;
    let (status, _) = app.get("/contacts", &alice).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .post("/rbac/pages", &admin, json!({ "name": "Reports", "url": "/reports" }))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, _) = app.get("/contacts", &alice).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn without_cache_direct_writes_apply_immediately() -> Result<()> {
    let app = TestApp::spawn().await?;
    let (_, alice) = app.user_with_roles("alice", &["Editor"]).await?;

    let (status, _) = app.get("/contacts", &alice).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.grant("Editor", "Contacts", "Read").await?;

    let (status, _) = app.get("/contacts", &alice).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}
