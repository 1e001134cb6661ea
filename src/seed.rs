//! Bootstrap data: the built-in permissions and one system role per
//! [`RoleTier`], plus helpers the CLI and tests use to create tenants and
//! users. Everything here is idempotent where it can be.

use anyhow::{bail, Context};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::authz::{actions, permission_name, resources, RoleTier, WILDCARD};
use crate::models::organization::{Department, Organization};
use crate::models::user::{NewUser, User};
use crate::utils::{hash_password, normalize_email, utc_now};

const ALL_RESOURCES: [&str; 4] = [resources::TICKETS, resources::ROLES, resources::PERMISSIONS, resources::USERS];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub permissions_created: u64,
    pub roles_created: u64,
    pub links_created: u64,
}

/// Permission names granted to the system role of `tier`.
pub fn default_permissions(tier: RoleTier) -> Vec<String> {
    match tier {
        RoleTier::SuperAdmin => vec![WILDCARD.to_string()],
        RoleTier::SystemAdmin => ALL_RESOURCES.iter().flat_map(|resource| crud(resource)).collect(),
        RoleTier::CompanyAdmin => [
            crud(resources::TICKETS),
            crud(resources::ROLES),
            crud(resources::USERS),
            only(resources::PERMISSIONS, &[actions::READ]),
        ]
        .concat(),
        RoleTier::CompanyManager => [
            crud(resources::TICKETS),
            only(resources::ROLES, &[actions::READ]),
            only(resources::USERS, &[actions::READ]),
        ]
        .concat(),
        RoleTier::Agent => only(resources::TICKETS, &[actions::CREATE, actions::READ, actions::UPDATE]),
        RoleTier::Client => only(resources::TICKETS, &[actions::CREATE, actions::READ]),
    }
}

fn crud(resource: &str) -> Vec<String> {
    only(resource, &actions::ALL)
}

fn only(resource: &str, granted: &[&str]) -> Vec<String> {
    granted.iter().map(|action| permission_name(resource, action)).collect()
}

/// Inserts missing permissions, system roles and their links. Existing rows
/// are left alone, so running it twice creates nothing the second time.
pub async fn seed_rbac(pool: &SqlitePool) -> anyhow::Result<SeedSummary> {
    let mut summary = SeedSummary::default();
    let now = utc_now();
    let mut tx = pool.begin().await?;

    let mut catalogue: Vec<(String, String, String)> = vec![(WILDCARD.into(), WILDCARD.into(), WILDCARD.into())];
    for resource in ALL_RESOURCES {
        for action in actions::ALL {
            catalogue.push((permission_name(resource, action), resource.to_string(), action.to_string()));
        }
    }

    for (name, resource, action) in &catalogue {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO permissions (id, name, resource, action, description, created_at, updated_at) \
             VALUES (?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(resource)
        .bind(action)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to seed permission {name}"))?;
        summary.permissions_created += result.rows_affected();
    }

    for tier in RoleTier::ALL {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO roles (id, name, description, is_system, created_at, updated_at) \
             VALUES (?, ?, ?, 1, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tier.as_str())
        .bind(format!("Built-in {tier} role"))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to seed role {tier}"))?;
        summary.roles_created += result.rows_affected();

        for permission in default_permissions(tier) {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) \
                 SELECT r.id, p.id, ? FROM roles r, permissions p WHERE r.name = ? AND p.name = ?",
            )
            .bind(now)
            .bind(tier.as_str())
            .bind(&permission)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to link {permission} to {tier}"))?;
            summary.links_created += result.rows_affected();
        }
    }

    tx.commit().await?;
    tracing::info!(
        permissions = summary.permissions_created,
        roles = summary.roles_created,
        links = summary.links_created,
        "rbac seed applied"
    );

    Ok(summary)
}

pub async fn create_organization(pool: &SqlitePool, name: &str) -> anyhow::Result<Organization> {
    let now = utc_now();
    let organization = Organization {
        id: Uuid::new_v4(),
        name: name.trim().to_string(),
        created_at: now,
        updated_at: now,
    };

    sqlx::query("INSERT INTO organizations (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
        .bind(organization.id.to_string())
        .bind(&organization.name)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .with_context(|| format!("failed to create organization {name}"))?;

    Ok(organization)
}

pub async fn create_department(pool: &SqlitePool, organization_id: Uuid, name: &str) -> anyhow::Result<Department> {
    let now = utc_now();
    let department = Department {
        id: Uuid::new_v4(),
        organization_id,
        name: name.trim().to_string(),
        created_at: now,
        updated_at: now,
    };

    sqlx::query("INSERT INTO departments (id, organization_id, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
        .bind(department.id.to_string())
        .bind(organization_id.to_string())
        .bind(&department.name)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .with_context(|| format!("failed to create department {name}"))?;

    Ok(department)
}

/// Creates the user and assigns the system role matching its tier.
pub async fn create_user(pool: &SqlitePool, new_user: NewUser) -> anyhow::Result<User> {
    if let (Some(department_id), organization_id) = (new_user.department_id, new_user.organization_id) {
        let owner: Option<String> = sqlx::query_scalar("SELECT organization_id FROM departments WHERE id = ?")
            .bind(department_id.to_string())
            .fetch_optional(pool)
            .await?;
        if owner != organization_id.map(|id| id.to_string()) {
            bail!("department {department_id} does not belong to the user's organization");
        }
    }

    let role_id: Option<String> = sqlx::query_scalar("SELECT id FROM roles WHERE name = ? AND is_system = 1")
        .bind(new_user.role.as_str())
        .fetch_optional(pool)
        .await?;
    let role_id = role_id.with_context(|| format!("system role {} missing; run the seed first", new_user.role))?;

    let password_hash = hash_password(&new_user.password)?;
    let now = utc_now();
    let user = User {
        id: Uuid::new_v4(),
        name: new_user.name,
        email: normalize_email(&new_user.email),
        role: new_user.role,
        organization_id: new_user.organization_id,
        department_id: new_user.department_id,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, organization_id, department_id, is_active, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(user.id.to_string())
    .bind(&user.name)
    .bind(&user.email)
    .bind(password_hash)
    .bind(user.role.as_str())
    .bind(user.organization_id.map(|id| id.to_string()))
    .bind(user.department_id.map(|id| id.to_string()))
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("failed to create user {}", user.email))?;

    sqlx::query("INSERT INTO user_roles (id, user_id, role_id, assigned_by, assigned_at, is_active) VALUES (?, ?, ?, NULL, ?, 1)")
        .bind(Uuid::new_v4().to_string())
        .bind(user.id.to_string())
        .bind(role_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_get_narrowing_permission_sets() {
        assert_eq!(default_permissions(RoleTier::SuperAdmin), vec!["*"]);
        assert_eq!(default_permissions(RoleTier::SystemAdmin).len(), 16);

        let client = default_permissions(RoleTier::Client);
        assert!(client.contains(&"read_tickets".to_string()));
        assert!(!client.contains(&"delete_tickets".to_string()));

        let manager = default_permissions(RoleTier::CompanyManager);
        assert!(manager.contains(&"delete_tickets".to_string()));
        assert!(!manager.contains(&"update_roles".to_string()));
    }
}
