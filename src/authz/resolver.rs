use std::collections::BTreeSet;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use uuid::Uuid;

use super::{AuthError, Identity, IdentityStore, Principal, RoleAssignment, RoleTier, StoreError};
use crate::app::AppState;
use crate::config::AuthConfig;
use crate::errors::AppError;
use crate::session::{token_from_headers, SessionCodec};

/// Turns request credentials into a [`Principal`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, token: Option<&str>) -> Result<Principal, AuthError>;
}

/// Resolved principals keyed by identity, expiring after a short TTL.
///
/// Every invalidation bumps `epoch`. A population holds the epoch it saw
/// before reading assignments and withdraws its entry if an invalidation
/// landed in between, so a stale principal never outlives a role change.
#[derive(Clone)]
pub struct PrincipalCache {
    inner: Cache<Uuid, Principal>,
    epoch: Arc<AtomicU64>,
}

/// Epoch observed before loading a principal's assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTicket(u64);

impl PrincipalCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self {
            inner,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self, identity_id: &Uuid) -> Option<Principal> {
        self.inner.get(identity_id).await
    }

    /// Take before reading role assignments from the store.
    pub fn ticket(&self) -> CacheTicket {
        CacheTicket(self.epoch.load(Ordering::SeqCst))
    }

    /// Caches `principal` unless an invalidation happened since `ticket`.
    /// Returns whether the entry was kept.
    pub async fn insert(&self, ticket: CacheTicket, principal: Principal) -> bool {
        let identity_id = principal.user_id;
        if self.ticket() != ticket {
            tracing::debug!(identity_id = %identity_id, "principal not cached: invalidated while loading");
            return false;
        }

        self.inner.insert(identity_id, principal).await;

        // An invalidation may have run between the check and the insert.
        if self.ticket() != ticket {
            self.inner.invalidate(&identity_id).await;
            tracing::debug!(identity_id = %identity_id, "principal withdrawn: invalidated while caching");
            return false;
        }
        true
    }

    pub async fn invalidate(&self, identity_id: &Uuid) {
        tracing::debug!(identity_id = %identity_id, "principal cache entry invalidated");
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate(identity_id).await;
    }

    pub fn invalidate_all(&self) {
        tracing::debug!("principal cache cleared");
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate_all();
    }
}

/// Production provider: session token -> stored identity -> role assignments.
pub struct SessionIdentityProvider {
    store: Arc<dyn IdentityStore>,
    codec: SessionCodec,
    cache: PrincipalCache,
    lookup_timeout: Duration,
}

impl SessionIdentityProvider {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        codec: SessionCodec,
        cache: PrincipalCache,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            store,
            codec,
            cache,
            lookup_timeout,
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, identity: Option<Uuid>, lookup: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        let source = match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => StoreError::Timeout(self.lookup_timeout),
        };

        tracing::error!(
            operation = operation,
            identity_id = ?identity,
            error = %source,
            "identity store lookup failed"
        );
        Err(AuthError::lookup(operation, identity, source))
    }
}

#[async_trait]
impl IdentityProvider for SessionIdentityProvider {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn resolve(&self, token: Option<&str>) -> Result<Principal, AuthError> {
        let token = token.ok_or(AuthError::Unauthenticated)?;
        let claims = self.codec.decode(token).map_err(|err| {
            tracing::debug!(error = %err, "session token rejected");
            AuthError::Unauthenticated
        })?;

        let now = Utc::now();
        let identity = self
            .bounded(
                "find_identity_by_session_id",
                Some(claims.sub),
                self.store.find_identity_by_session_id(claims.sid, now),
            )
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        if identity.id != claims.sub || !identity.is_active {
            tracing::debug!(identity_id = %identity.id, "session does not belong to an active identity");
            return Err(AuthError::Unauthenticated);
        }

        if let Some(principal) = self.cache.get(&identity.id).await {
            tracing::debug!(identity_id = %identity.id, "principal cache hit");
            return Ok(principal);
        }

        let ticket = self.cache.ticket();
        let assignments = self
            .bounded(
                "find_active_role_assignments",
                Some(identity.id),
                self.store.find_active_role_assignments(identity.id, now),
            )
            .await?;

        let principal = build_principal(&identity, &assignments, now);
        self.cache.insert(ticket, principal.clone()).await;

        Ok(principal)
    }
}

/// Assembles a principal from an identity and its role assignments. Inactive
/// or expired assignments contribute nothing, even if the store returned them.
pub fn build_principal(identity: &Identity, assignments: &[RoleAssignment], now: DateTime<Utc>) -> Principal {
    let permissions: BTreeSet<String> = assignments
        .iter()
        .filter(|assignment| assignment.is_effective_at(now))
        .flat_map(|assignment| assignment.permissions.iter().cloned())
        .collect();

    Principal::new(identity.id, identity.role)
        .with_organization(identity.organization_id)
        .with_department(identity.department_id)
        .with_permissions(permissions)
}

/// Non-production provider that authenticates everything as a fixed super admin.
pub struct DevIdentityProvider {
    principal: Principal,
}

impl DevIdentityProvider {
    pub const DEV_IDENTITY: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0001);

    fn new() -> Self {
        Self {
            principal: Principal::new(Self::DEV_IDENTITY, RoleTier::SuperAdmin)
                .with_permissions([super::WILDCARD]),
        }
    }
}

#[async_trait]
impl IdentityProvider for DevIdentityProvider {
    fn name(&self) -> &'static str {
        "dev-bypass"
    }

    async fn resolve(&self, _token: Option<&str>) -> Result<Principal, AuthError> {
        Ok(self.principal.clone())
    }
}

/// Picks the identity provider once at startup. Asking for the development
/// bypass in production is a configuration error, not a fallback.
pub fn select_identity_provider(
    config: &AuthConfig,
    store: Arc<dyn IdentityStore>,
    codec: SessionCodec,
    cache: PrincipalCache,
) -> Result<Arc<dyn IdentityProvider>, AppError> {
    if config.dev_bypass {
        if config.environment.is_production() {
            return Err(AppError::configuration(
                "AUTH_DEV_BYPASS cannot be enabled when APP_ENV is production",
            ));
        }

        tracing::warn!(environment = ?config.environment, "development auth bypass enabled; every request is a super admin");
        return Ok(Arc::new(DevIdentityProvider::new()));
    }

    Ok(Arc::new(SessionIdentityProvider::new(
        store,
        codec,
        cache,
        config.lookup_timeout,
    )))
}

/// Extractor handing the request's principal to a handler.
///
/// A principal already attached to the request is reused as-is.
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Principal);

impl Deref for CurrentPrincipal {
    type Target = Principal;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentPrincipal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(CurrentPrincipal(principal.clone()));
        }

        let token = token_from_headers(&parts.headers);
        let principal = state.identity.resolve(token.as_deref()).await?;
        parts.extensions.insert(principal.clone());

        Ok(CurrentPrincipal(principal))
    }
}
