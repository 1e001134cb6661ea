use std::time::Duration;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use serde_json::json;
use sqlx::SqlitePool;

use helpdesk_access::events::chain_hash;

mod common;

/// The listener writes asynchronously; poll until `count` rows exist.
async fn wait_for_entries(pool: &SqlitePool, count: i64) -> Result<()> {
    for _ in 0..50 {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM audit_log").fetch_one(pool).await?;
        if n >= count {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    anyhow::bail!("audit log never reached {count} entries")
}

#[tokio::test]
async fn access_changes_are_chained_in_the_audit_log() -> Result<()> {
    let app = common::spawn_app().await?;
    let t = common::tenancy(&app.pool).await?;
    let admin = app.token_for(t.company_admin).await?;

    let (status, role) = app
        .send(Method::POST, "/rbac/roles", Some(&admin), Some(json!({ "name": "triage" })))
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let role_id = role["id"].as_str().unwrap_or_default().to_string();

    let (status, assignment) = app
        .send(
            Method::POST,
            &format!("/rbac/users/{}/roles", t.agent),
            Some(&admin),
            Some(json!({ "role_id": role_id })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .send(
            Method::DELETE,
            &format!("/rbac/users/{}/roles/{}", t.agent, assignment["id"].as_str().unwrap_or_default()),
            Some(&admin),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    wait_for_entries(&app.pool, 3).await?;

    let rows: Vec<(String, Option<String>, String, Option<String>, String, String)> = sqlx::query_as(
        "SELECT event_name, actor_id, severity, prev_hash, hash, payload FROM audit_log ORDER BY created_at, rowid",
    )
    .fetch_all(&app.pool)
    .await?;

    let names: Vec<&str> = rows.iter().map(|r| r.0.as_str()).collect();
    assert_eq!(names, ["role.created", "user_role.assigned", "user_role.revoked"]);

    for row in &rows {
        assert_eq!(row.1.as_deref(), Some(t.company_admin.to_string().as_str()));
        assert_eq!(row.2, "critical");
    }

    // Each hash covers the previous one
    assert_eq!(rows[0].3, None);
    for pair in rows.windows(2) {
        assert_eq!(pair[1].3.as_deref(), Some(pair[0].4.as_str()));
    }
    for row in &rows {
        assert_eq!(row.4, chain_hash(row.3.as_deref(), &row.5));
    }

    Ok(())
}
