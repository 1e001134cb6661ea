use std::collections::BTreeSet;

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::RoleTier;

/// Principal represents the authenticated user with their resolved capabilities.
///
/// Built once per request by an [`super::IdentityProvider`]; the capability
/// flags are derived from `role` at construction and never set independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Principal {
    pub user_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub role: RoleTier,
    pub is_super_user: bool,
    pub can_cross_organizations: bool,
    pub can_cross_departments: bool,
    #[schema(value_type = Vec<String>)]
    pub permissions: BTreeSet<String>,
}

impl Principal {
    pub fn new(user_id: Uuid, role: RoleTier) -> Self {
        Self {
            user_id,
            organization_id: None,
            department_id: None,
            role,
            is_super_user: role.is_super_user(),
            can_cross_organizations: role.can_cross_organizations(),
            can_cross_departments: role.can_cross_departments(),
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_organization(mut self, organization_id: Option<Uuid>) -> Self {
        self.organization_id = organization_id;
        self
    }

    pub fn with_department(mut self, department_id: Option<Uuid>) -> Self {
        self.department_id = department_id;
        self
    }

    pub fn with_permissions<I, S>(mut self, perms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = perms.into_iter().map(Into::into).collect();
        self
    }

    pub fn holds(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn has_wildcard(&self) -> bool {
        self.holds(super::WILDCARD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_derived_from_the_role() {
        let p = Principal::new(Uuid::new_v4(), RoleTier::CompanyManager);
        assert!(!p.is_super_user);
        assert!(!p.can_cross_organizations);
        assert!(p.can_cross_departments);
    }

    #[test]
    fn permissions_deduplicate() {
        let p = Principal::new(Uuid::new_v4(), RoleTier::Agent)
            .with_permissions(["read_tickets", "read_tickets", "update_tickets"]);
        assert_eq!(p.permissions.len(), 2);
        assert!(!p.has_wildcard());
    }
}
