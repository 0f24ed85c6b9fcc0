mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};

use common::TestApp;

#[tokio::test]
async fn health_endpoint_reports_db_ok_and_catalog_size() -> Result<()> {
    let app = TestApp::spawn().await?;

    let (status, body) = app.request(Method::GET, "/api/health", None, None).await?;
    assert_eq!(status, StatusCode::OK, "health endpoint did not return 200");
    assert_eq!(body["db_ok"], true, "expected db_ok: true, got: {body}");
    // Seeded catalog: 4 pages x 4 operations.
    assert_eq!(body["policies"], 16);

    Ok(())
}
