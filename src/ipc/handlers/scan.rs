use crate::admission::{self, Admission, ScanOrigin, ScanPolicy, SessionWindow};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_query_failed, db_update_failed, get_required_str, session_not_found, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

/// Student-facing: no auth gate on either method. The scan page only needs
/// the session code from the QR link.
fn scan_submit(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let student_id = params
        .get("studentId")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let client_ip = params
        .get("clientIp")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let user_agent = params
        .get("userAgent")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let policy = ScanPolicy::load(conn).map_err(db_query_failed)?;
    let origin = ScanOrigin {
        client_ip,
        user_agent,
    };
    let outcome = admission::admit(conn, &code, student_id, &origin, &policy, Utc::now())
        .map_err(db_update_failed)?;
    match outcome {
        Admission::Granted(rec) => Ok(json!({
            "record": {
                "id": rec.record_id,
                "studentId": rec.student_id,
                "fullName": rec.full_name,
                "scannedAt": db::fmt_ts(rec.scanned_at),
            },
            "message": format!("attendance marked for {}", rec.full_name),
        })),
        Admission::SessionNotFound => Err(session_not_found()),
        Admission::SessionClosed => Err(HandlerErr::new("session_closed", "session is closed")),
        Admission::MissingIdentifier => Err(HandlerErr::new(
            "missing_identifier",
            "select your name or enter your id",
        )),
        Admission::UnknownStudent => Err(HandlerErr::new(
            "unknown_student",
            "student id is not registered",
        )),
        // One message for both constraints: the reply must not reveal
        // whether this device already scanned for someone else.
        Admission::Duplicate(_) => Err(HandlerErr::new(
            "duplicate_scan",
            "already scanned or same device detected",
        )),
    }
}

/// Everything the scan form needs in one round trip: session status plus
/// the active roster for the name picker.
fn scan_context(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let row: Option<(String, String, i64, String, String)> = conn
        .query_row(
            "SELECT id, title, is_active, starts_at, ends_at FROM sessions WHERE code = ?",
            [&code],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()
        .map_err(db_query_failed)?;
    let Some((_, title, is_active, starts_at, ends_at)) = row else {
        return Err(session_not_found());
    };
    let window = SessionWindow {
        is_active: is_active != 0,
        starts_at: db::parse_ts(&starts_at).map_err(db_query_failed)?,
        ends_at: db::parse_ts(&ends_at).map_err(db_query_failed)?,
    };
    let is_open = admission::is_open(&window, Utc::now());

    let mut stmt = conn
        .prepare(
            "SELECT student_id, full_name FROM students
             WHERE active = 1
             ORDER BY full_name, student_id",
        )
        .map_err(db_query_failed)?;
    let students = stmt
        .query_map([], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;

    Ok(json!({
        "session": {
            "code": code,
            "title": title,
            "startsAt": starts_at,
            "endsAt": ends_at,
            "isOpen": is_open,
        },
        "students": students,
    }))
}

fn handle(
    state: &AppState,
    req: &Request,
    f: fn(&Connection, &Value) -> Result<Value, HandlerErr>,
) -> serde_json::Value {
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
        "scan.submit" => Some(handle(state, req, scan_submit)),
        "scan.context" => Some(handle(state, req, scan_context)),
        _ => None,
    }
}
