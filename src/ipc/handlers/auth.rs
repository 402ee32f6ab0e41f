use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let credential = req
        .params
        .get("credential")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if !state.verifier.verify(credential) {
        return err(&req.id, "unauthorized", "invalid credential", None);
    }
    match auth::issue_token() {
        Ok(token) => {
            state.tokens.insert(token.clone());
            ok(&req.id, json!({ "authToken": token }))
        }
        Err(e) => err(&req.id, "token_failed", format!("{e:?}"), None),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let token = req
        .params
        .get("authToken")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let removed = state.tokens.remove(token);
    ok(&req.id, json!({ "loggedOut": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        _ => None,
    }
}
