mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::{json, Value};

use common::{wait_for_event, TestApp};
use contacts_api::events::chain_hash;

#[tokio::test]
async fn rbac_changes_are_logged_as_critical() -> Result<()> {
    let app = TestApp::spawn().await?;
    let admin = app.admin().await?;

    let (status, role) = app
        .post("/rbac/roles", &admin, json!({ "name": "Editor", "description": "Edits contacts" }))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{role}");

    wait_for_event(&app.pool, "role.created").await?;

    let (severity, subject, properties): (String, uuid::Uuid, String) = sqlx::query_as(
        "SELECT severity, subject_id, properties FROM activity_log WHERE event_name = 'role.created'",
    )
    .fetch_one(&app.pool)
    .await?;
    assert_eq!(severity, "critical");
    assert_eq!(subject.to_string(), role["id"].as_str().unwrap_or_default());

    let props: Value = serde_json::from_str(&properties)?;
    assert_eq!(props["payload"]["new"]["name"], "Editor");

    Ok(())
}

#[tokio::test]
async fn updates_carry_the_previous_state() -> Result<()> {
    let app = TestApp::spawn().await?;
    let admin = app.admin().await?;

    let (_, contact) = app
        .post("/contacts", &admin, json!({ "first_name": "Grace", "last_name": "Hopper" }))
        .await?;
    let id = contact["id"].as_str().unwrap_or_default();

    let (status, _) = app
        .put(&format!("/contacts/{id}"), &admin, json!({ "company": "Navy" }))
        .await?;
    assert_eq!(status, StatusCode::OK);

    wait_for_event(&app.pool, "contact.updated").await?;

    let properties: String =
        sqlx::query_scalar("SELECT properties FROM activity_log WHERE event_name = 'contact.updated'")
            .fetch_one(&app.pool)
            .await?;
    let props: Value = serde_json::from_str(&properties)?;
    assert_eq!(props["payload"]["new"]["company"], "Navy");
    assert!(props["payload"]["old"]["company"].is_null());

    Ok(())
}

#[tokio::test]
async fn entries_form_a_hash_chain() -> Result<()> {
    let app = TestApp::spawn().await?;
    let admin = app.admin().await?;

    app.post("/rbac/operations", &admin, json!({ "name": "Export" })).await?;
    wait_for_event(&app.pool, "operation.created").await?;
    app.post("/rbac/operations", &admin, json!({ "name": "Import" })).await?;

    for _ in 0..50 {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM activity_log WHERE event_name = 'operation.created'")
            .fetch_one(&app.pool)
            .await?;
        if count == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    let rows: Vec<(Option<String>, String, String)> =
        sqlx::query_as("SELECT prev_hash, hash, properties FROM activity_log ORDER BY rowid")
            .fetch_all(&app.pool)
            .await?;
    assert!(rows.len() >= 2);

    let mut prev: Option<String> = None;
    for (prev_hash, hash, properties) in rows {
        assert_eq!(prev_hash, prev);
        assert_eq!(hash, chain_hash(prev.as_deref(), &properties));
        prev = Some(hash);
    }

    Ok(())
}
