use super::{permission_name, AuthError, Principal};

/// Permission check with the standard RBAC rules.
///
/// Evaluation order:
/// 1. super user -> allow
/// 2. wildcard `*` permission -> allow
/// 3. exact `<action>_<resource>` membership -> allow
/// 4. deny
///
/// No prefix or partial matching: `read_ticket` never satisfies `read_tickets`.
pub fn has_permission(principal: &Principal, resource: &str, action: &str) -> bool {
    if principal.is_super_user || principal.has_wildcard() {
        return true;
    }

    principal.holds(&permission_name(resource, action))
}

/// Guard form of [`has_permission`]; handlers call this before touching the store.
pub fn require_permission(principal: &Principal, resource: &str, action: &str) -> Result<(), AuthError> {
    if has_permission(principal, resource, action) {
        return Ok(());
    }

    tracing::warn!(
        identity_id = %principal.user_id,
        role = %principal.role,
        resource = %resource,
        action = %action,
        "permission denied"
    );
    Err(AuthError::denied(resource, action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::{actions, resources, RoleTier};
    use uuid::Uuid;

    const SAMPLE_RESOURCES: [&str; 5] = ["tickets", "roles", "permissions", "customers", "x"];
    const SAMPLE_ACTIONS: [&str; 5] = ["read", "create", "update", "delete", "export"];

    #[test]
    fn super_user_is_allowed_everything() {
        let principal = Principal::new(Uuid::new_v4(), RoleTier::SuperAdmin);
        assert!(principal.permissions.is_empty());

        for r in SAMPLE_RESOURCES {
            for a in SAMPLE_ACTIONS {
                assert!(has_permission(&principal, r, a), "{a}_{r}");
            }
        }
    }

    #[test]
    fn wildcard_is_allowed_everything() {
        let principal = Principal::new(Uuid::new_v4(), RoleTier::Client).with_permissions(["*"]);

        for r in SAMPLE_RESOURCES {
            for a in SAMPLE_ACTIONS {
                assert!(has_permission(&principal, r, a), "{a}_{r}");
            }
        }
    }

    #[test]
    fn exact_permission_is_required() {
        let principal = Principal::new(Uuid::new_v4(), RoleTier::Agent).with_permissions(["read_tickets"]);

        assert!(has_permission(&principal, "tickets", "read"));
        assert!(!has_permission(&principal, "tickets", "delete"));
        assert!(!has_permission(&principal, "ticket", "read"));
        assert!(!has_permission(&principal, "tickets", "rea"));
        assert!(!has_permission(&principal, "ickets", "read_t"));
    }

    #[test]
    fn system_admin_without_grants_is_denied() {
        let principal = Principal::new(Uuid::new_v4(), RoleTier::SystemAdmin);
        assert!(!has_permission(&principal, resources::ROLES, actions::CREATE));
    }

    #[test]
    fn guard_reports_the_missing_permission() {
        let principal = Principal::new(Uuid::new_v4(), RoleTier::Agent);
        match require_permission(&principal, "roles", "update") {
            Err(AuthError::AuthorizationDenied { resource, action }) => {
                assert_eq!(resource, "roles");
                assert_eq!(action, "update");
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }
}
