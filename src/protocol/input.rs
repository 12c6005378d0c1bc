//! Messages written to the agent's stdin

use serde_json::{Value, json};

/// A user turn in stream-json input format
pub fn user_message(text: &str) -> Value {
    json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": [{"type": "text", "text": text}]
        }
    })
}

/// Allow a pending `can_use_tool` request
///
/// `updated_input` replaces the tool input; the agent expects it even when
/// unchanged. `updated_permissions` are broadcast as "always allow" rules.
pub fn permission_allow(
    request_id: &str,
    updated_input: &Value,
    updated_permissions: Option<&Value>,
) -> Value {
    let mut decision = json!({
        "behavior": "allow",
        "updatedInput": updated_input,
    });
    if let Some(permissions) = updated_permissions {
        decision["updatedPermissions"] = permissions.clone();
    }
    control_response(request_id, decision)
}

/// Deny a pending `can_use_tool` request
pub fn permission_deny(request_id: &str, message: &str, interrupt: bool) -> Value {
    control_response(
        request_id,
        json!({
            "behavior": "deny",
            "message": message,
            "interrupt": interrupt,
        }),
    )
}

/// Reject a control request the bridge does not handle
pub fn control_error(request_id: &str, message: &str) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": request_id,
            "error": message,
        }
    })
}

fn control_response(request_id: &str, response: Value) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response,
        }
    })
}

/// Session-scoped "always allow" rule for a tool
pub fn session_allow_rule(tool_name: &str) -> Value {
    json!([{
        "type": "addRules",
        "rules": [{"toolName": tool_name}],
        "behavior": "allow",
        "destination": "session",
    }])
}
