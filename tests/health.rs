use anyhow::Result;
use axum::http::{Method, StatusCode};

mod common;

#[tokio::test]
async fn health_endpoint_reports_db_ok() -> Result<()> {
    let app = common::spawn_app().await?;

    // Health is public: no token
    let (status, v) = app.send(Method::GET, "/api/health", None, None).await?;
    assert_eq!(status, StatusCode::OK, "health endpoint did not return 200");

    let db_ok = v.get("db_ok").and_then(|b| b.as_bool()).unwrap_or(false);
    assert!(db_ok, "expected db_ok: true, got: {}", v);
    assert_eq!(v["status"], "ok");
    assert_eq!(v["identity_provider"], "session");

    Ok(())
}

#[tokio::test]
async fn health_reports_degraded_when_the_database_is_gone() -> Result<()> {
    let app = common::spawn_app().await?;
    app.pool.close().await;

    let (status, v) = app.send(Method::GET, "/api/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "degraded");
    assert_eq!(v["db_ok"], false);
    // Driver errors stay in the logs
    assert!(v.get("db_error").is_none(), "{v}");
    assert!(!v.to_string().to_lowercase().contains("pool"), "{v}");

    Ok(())
}
