use crate::admission::ScanPolicy;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    bad_params, db_query_failed, db_update_failed, get_required_str, require_auth, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn default_scan_section() -> Value {
    json!({ "requireRegistered": false })
}

fn require_scan_section(params: &Value) -> Result<(), HandlerErr> {
    let section = get_required_str(params, "section")?;
    if section != "scan" {
        return Err(bad_params(format!("unknown setup section: {section}")));
    }
    Ok(())
}

fn load_scan_section(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut section = default_scan_section();
    if let Some(stored) =
        db::settings_get_json(conn, ScanPolicy::SETTINGS_KEY).map_err(db_query_failed)?
    {
        if let (Some(target), Some(overrides)) = (section.as_object_mut(), stored.as_object()) {
            for (k, v) in overrides {
                target.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(section)
}

fn setup_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    require_scan_section(params)?;
    Ok(json!({ "values": load_scan_section(conn)? }))
}

fn setup_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    require_scan_section(params)?;
    let Some(values) = params.get("values").and_then(|v| v.as_object()) else {
        return Err(bad_params("missing params.values"));
    };
    let mut section = load_scan_section(conn)?;
    let defaults = default_scan_section();
    for (k, v) in values {
        if defaults.get(k).is_none() {
            return Err(bad_params(format!("unknown scan setting: {k}")));
        }
        section[k.as_str()] = v.clone();
    }
    db::settings_set_json(conn, ScanPolicy::SETTINGS_KEY, &section).map_err(db_update_failed)?;
    Ok(json!({ "values": section }))
}

fn gated(
    state: &AppState,
    req: &Request,
    f: fn(&Connection, &Value) -> Result<Value, HandlerErr>,
) -> serde_json::Value {
    if let Err(e) = require_auth(state, &req.params) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(gated(state, req, setup_get)),
        "setup.update" => Some(gated(state, req, setup_update)),
        _ => None,
    }
}
