#![allow(dead_code)]

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use helpdesk_access::authz::RoleTier;
use helpdesk_access::config::{AuthConfig, Environment};
use helpdesk_access::create_app_with_config;
use helpdesk_access::models::user::NewUser;
use helpdesk_access::seed;
use helpdesk_access::session::SessionCodec;

pub const PASSWORD: &str = "password123";
pub const SECRET: &str = "test-secret";

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    pub config: AuthConfig,
    _dir: TempDir,
}

pub async fn test_pool() -> Result<(SqlitePool, TempDir)> {
    let dir = tempdir()?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;
    seed::seed_rbac(&pool).await?;

    Ok((pool, dir))
}

pub async fn spawn_app() -> Result<TestApp> {
    spawn_app_with(AuthConfig::for_environment(Environment::Test, SECRET)).await
}

pub async fn spawn_app_with(config: AuthConfig) -> Result<TestApp> {
    let (pool, dir) = test_pool().await?;
    let app = create_app_with_config(pool.clone(), config.clone()).await?;
    Ok(TestApp {
        app,
        pool,
        config,
        _dir: dir,
    })
}

impl TestApp {
    /// Opens a session for `user_id` without going through the password check.
    pub async fn token_for(&self, user_id: Uuid) -> Result<String> {
        let codec = SessionCodec::new(&self.config);
        let now = Utc::now();
        let session_id = Uuid::new_v4();

        sqlx::query("INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
            .bind(session_id.to_string())
            .bind(user_id.to_string())
            .bind(now)
            .bind(codec.expiry_from(now))
            .execute(&self.pool)
            .await?;

        Ok(codec.encode(session_id, user_id, now)?)
    }

    pub async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let resp = self.app.clone().oneshot(builder.body(body)?).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
        Ok((status, value))
    }

    pub async fn get(&self, uri: &str, token: &str) -> Result<(StatusCode, Value)> {
        self.send(Method::GET, uri, Some(token), None).await
    }
}

/// Two organizations, three departments and one user per tier.
pub struct Tenancy {
    pub org_a: Uuid,
    pub org_b: Uuid,
    pub dept_a1: Uuid,
    pub dept_a2: Uuid,
    pub dept_b1: Uuid,
    pub super_admin: Uuid,
    pub system_admin: Uuid,
    pub company_admin: Uuid,
    pub manager: Uuid,
    pub agent: Uuid,
    pub agent_b: Uuid,
    pub client: Uuid,
}

pub async fn create_user(
    pool: &SqlitePool,
    email: &str,
    role: RoleTier,
    organization_id: Option<Uuid>,
    department_id: Option<Uuid>,
) -> Result<Uuid> {
    let user = seed::create_user(
        pool,
        NewUser {
            name: email.split('@').next().unwrap_or(email).to_string(),
            email: email.to_string(),
            password: PASSWORD.to_string(),
            role,
            organization_id,
            department_id,
        },
    )
    .await?;
    Ok(user.id)
}

pub async fn tenancy(pool: &SqlitePool) -> Result<Tenancy> {
    let org_a = seed::create_organization(pool, "Acme").await?.id;
    let org_b = seed::create_organization(pool, "Globex").await?.id;
    let dept_a1 = seed::create_department(pool, org_a, "Support").await?.id;
    let dept_a2 = seed::create_department(pool, org_a, "Billing").await?.id;
    let dept_b1 = seed::create_department(pool, org_b, "Support").await?.id;

    Ok(Tenancy {
        org_a,
        org_b,
        dept_a1,
        dept_a2,
        dept_b1,
        super_admin: create_user(pool, "root@example.com", RoleTier::SuperAdmin, None, None).await?,
        system_admin: create_user(pool, "ops@example.com", RoleTier::SystemAdmin, None, None).await?,
        company_admin: create_user(pool, "admin@acme.test", RoleTier::CompanyAdmin, Some(org_a), None).await?,
        manager: create_user(pool, "manager@acme.test", RoleTier::CompanyManager, Some(org_a), None).await?,
        agent: create_user(pool, "agent@acme.test", RoleTier::Agent, Some(org_a), Some(dept_a1)).await?,
        agent_b: create_user(pool, "agent@globex.test", RoleTier::Agent, Some(org_b), Some(dept_b1)).await?,
        client: create_user(pool, "client@acme.test", RoleTier::Client, Some(org_a), None).await?,
    })
}

pub struct TicketSeed<'a> {
    pub title: &'a str,
    pub organization_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub client_responsible_id: Option<Uuid>,
    pub status: &'a str,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_ticket(pool: &SqlitePool, ticket: TicketSeed<'_>) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO tickets (id, title, status, priority, organization_id, department_id, created_by, assigned_to, \
         client_responsible_id, created_at, updated_at) VALUES (?, ?, ?, 'medium', ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(ticket.title)
    .bind(ticket.status)
    .bind(ticket.organization_id.map(|id| id.to_string()))
    .bind(ticket.department_id.map(|id| id.to_string()))
    .bind(ticket.created_by.to_string())
    .bind(ticket.assigned_to.map(|id| id.to_string()))
    .bind(ticket.client_responsible_id.map(|id| id.to_string()))
    .bind(ticket.created_at)
    .bind(ticket.created_at)
    .execute(pool)
    .await?;
    Ok(id)
}

pub fn ids(page: &Value) -> Vec<String> {
    page["tickets"]
        .as_array()
        .map(|tickets| {
            tickets
                .iter()
                .filter_map(|t| t["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
