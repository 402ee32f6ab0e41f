use crate::ipc::error::err;
use crate::ipc::types::AppState;

/// Handler-level failure carried back to the IPC boundary as a
/// `{code, message, details?}` error object.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr::new("bad_params", message)
}

pub fn not_found(what: &str) -> HandlerErr {
    HandlerErr::new("not_found", format!("{what} not found"))
}

pub fn session_not_found() -> HandlerErr {
    HandlerErr::new("session_not_found", "invalid session code")
}

pub fn db_query_failed(e: impl ToString) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

pub fn db_update_failed(e: impl ToString) -> HandlerErr {
    HandlerErr::new("db_update_failed", e.to_string())
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

/// Required string that must also be non-blank after trimming.
pub fn get_required_trimmed(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, key)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(bad_params(format!("{} must not be blank", key)));
    }
    Ok(trimmed.to_string())
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Teacher gate: the token must have been issued by auth.login and not
/// revoked since.
pub fn require_auth(state: &AppState, params: &serde_json::Value) -> Result<(), HandlerErr> {
    let token = params
        .get("authToken")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if token.is_empty() || !state.tokens.contains(token) {
        return Err(HandlerErr::new("unauthorized", "teacher login required"));
    }
    Ok(())
}
