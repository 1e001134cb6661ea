use serde_json::Value;

fn schema_properties<'a>(doc: &'a Value, name: &str) -> &'a serde_json::Map<String, Value> {
    doc.get("components")
        .and_then(|c| c.get("schemas"))
        .and_then(|s| s.get(name))
        .and_then(|t| t.get("properties"))
        .and_then(Value::as_object)
        .unwrap_or_else(|| panic!("components.schemas.{name}.properties must exist"))
}

#[test]
fn openapi_has_ticket_and_principal_fields() -> anyhow::Result<()> {
    // Build the OpenAPI document the same way the server does
    let doc = helpdesk_access::docs::build_openapi(8000)?;
    let v = serde_json::to_value(&doc)?;

    let ticket = schema_properties(&v, "Ticket");
    for k in ["organization_id", "department_id", "created_by", "assigned_to", "client_responsible_id", "status"] {
        assert!(ticket.contains_key(k), "OpenAPI Ticket schema missing '{}'", k);
    }

    let principal = schema_properties(&v, "Principal");
    for k in ["user_id", "role", "is_super_user", "can_cross_organizations", "can_cross_departments", "permissions"] {
        assert!(principal.contains_key(k), "OpenAPI Principal schema missing '{}'", k);
    }

    let page = schema_properties(&v, "TicketPage");
    assert!(page.contains_key("total_pages"));

    Ok(())
}

#[test]
fn openapi_declares_both_session_transports() -> anyhow::Result<()> {
    let doc = helpdesk_access::docs::build_openapi(8123)?;
    let v = serde_json::to_value(&doc)?;

    let schemes = &v["components"]["securitySchemes"];
    assert_eq!(schemes["bearerAuth"]["scheme"], "bearer");
    assert_eq!(schemes["cookieAuth"]["in"], "cookie");
    assert_eq!(schemes["cookieAuth"]["name"], "sid");

    assert_eq!(v["servers"][0]["url"], "http://localhost:8123");

    let paths = v["paths"].as_object().map(|p| p.keys().cloned().collect::<Vec<_>>()).unwrap_or_default();
    for path in ["/tickets", "/tickets/{id}", "/rbac/users/{user_id}/roles/{assignment_id}", "/auth/me"] {
        assert!(paths.iter().any(|p| p == path), "missing path {path}, have {paths:?}");
    }

    Ok(())
}
