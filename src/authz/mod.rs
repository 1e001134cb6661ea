//! Authorization core - principal resolution, RBAC and tenant scoping
//!
//! This module implements the access-control policy of the helpdesk:
//! - Session -> principal resolution with a short-lived principal cache
//! - Permission evaluation (`<action>_<resource>` names, `*` wildcard)
//! - Tenant scope predicates for ticket visibility (four ordered tiers)
//!
//! Everything here returns structured outcomes; translating them to HTTP
//! statuses is the job of [`crate::errors::AppError`].

mod evaluator;
mod principal;
mod resolver;
mod scope;
mod store;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub use evaluator::{has_permission, require_permission};
pub use principal::Principal;
pub use resolver::{
    select_identity_provider, CurrentPrincipal, DevIdentityProvider, IdentityProvider,
    PrincipalCache, SessionIdentityProvider,
};
pub use scope::{build_scope, Narrowing, ScopePredicate, TicketFilters, TicketScope, TierPredicate};
pub use store::{Identity, IdentityStore, RoleAssignment, SqliteIdentityStore};

/// The permission name granting everything.
pub const WILDCARD: &str = "*";

/// Builds the canonical `<action>_<resource>` permission name.
pub fn permission_name(resource: &str, action: &str) -> String {
    format!("{action}_{resource}")
}

/// Well-known resources guarded by the evaluator
pub mod resources {
    pub const TICKETS: &str = "tickets";
    pub const ROLES: &str = "roles";
    pub const PERMISSIONS: &str = "permissions";
    pub const USERS: &str = "users";
}

/// Well-known actions
pub mod actions {
    pub const CREATE: &str = "create";
    pub const READ: &str = "read";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";

    pub const ALL: [&str; 4] = [CREATE, READ, UPDATE, DELETE];
}

/// Role tier stored on each user. Capability flags are derived from it,
/// never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoleTier {
    SuperAdmin,
    SystemAdmin,
    CompanyAdmin,
    CompanyManager,
    Agent,
    Client,
}

impl RoleTier {
    pub const ALL: [RoleTier; 6] = [
        RoleTier::SuperAdmin,
        RoleTier::SystemAdmin,
        RoleTier::CompanyAdmin,
        RoleTier::CompanyManager,
        RoleTier::Agent,
        RoleTier::Client,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleTier::SuperAdmin => "super_admin",
            RoleTier::SystemAdmin => "system_admin",
            RoleTier::CompanyAdmin => "company_admin",
            RoleTier::CompanyManager => "company_manager",
            RoleTier::Agent => "agent",
            RoleTier::Client => "client",
        }
    }

    pub fn is_super_user(&self) -> bool {
        matches!(self, RoleTier::SuperAdmin)
    }

    pub fn can_cross_organizations(&self) -> bool {
        match self {
            RoleTier::SuperAdmin | RoleTier::SystemAdmin => true,
            RoleTier::CompanyAdmin | RoleTier::CompanyManager | RoleTier::Agent | RoleTier::Client => false,
        }
    }

    pub fn can_cross_departments(&self) -> bool {
        match self {
            RoleTier::SuperAdmin
            | RoleTier::SystemAdmin
            | RoleTier::CompanyAdmin
            | RoleTier::CompanyManager => true,
            RoleTier::Agent | RoleTier::Client => false,
        }
    }
}

impl fmt::Display for RoleTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleTier {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoleTier::ALL
            .into_iter()
            .find(|tier| tier.as_str() == s)
            .ok_or_else(|| StoreError::Malformed(format!("unknown role tier '{s}'")))
    }
}

/// Failures of the identity/role/permission store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed store data: {0}")]
    Malformed(String),
    #[error("store lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcomes of authentication and authorization.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("no valid session")]
    Unauthenticated,
    #[error("permission {action}_{resource} denied")]
    AuthorizationDenied { resource: String, action: String },
    #[error("identity lookup failed during {operation}")]
    InternalLookup {
        operation: &'static str,
        identity: Option<Uuid>,
        #[source]
        source: StoreError,
    },
}

impl AuthError {
    pub fn denied(resource: &str, action: &str) -> Self {
        Self::AuthorizationDenied {
            resource: resource.to_string(),
            action: action.to_string(),
        }
    }

    pub fn lookup(operation: &'static str, identity: Option<Uuid>, source: StoreError) -> Self {
        Self::InternalLookup {
            operation,
            identity,
            source,
        }
    }
}
