use crate::admission::{self, SessionWindow};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_query_failed, db_update_failed, get_required_trimmed, not_found, require_auth,
    session_not_found, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::token;
use chrono::{Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

const DEFAULT_DURATION_MINUTES: i64 = 2;
const DEFAULT_LIST_LIMIT: i64 = 20;

struct SessionRow {
    id: String,
    code: String,
    title: String,
    starts_at: String,
    ends_at: String,
    is_active: bool,
    session_date: String,
    time_slot: String,
    teacher_id: Option<String>,
    teacher_name: Option<String>,
    subject_id: Option<String>,
    subject_name: Option<String>,
    present_count: i64,
    unique_devices: i64,
}

impl SessionRow {
    fn window(&self) -> Result<SessionWindow, HandlerErr> {
        Ok(SessionWindow {
            is_active: self.is_active,
            starts_at: db::parse_ts(&self.starts_at).map_err(db_query_failed)?,
            ends_at: db::parse_ts(&self.ends_at).map_err(db_query_failed)?,
        })
    }

    fn to_json(&self, is_open: bool) -> Value {
        json!({
            "id": self.id,
            "code": self.code,
            "title": self.title,
            "startsAt": self.starts_at,
            "endsAt": self.ends_at,
            "isActive": self.is_active,
            "date": self.session_date,
            "timeSlot": self.time_slot,
            "teacher": self.teacher_id.as_ref().map(|id| json!({
                "id": id,
                "fullName": self.teacher_name,
            })),
            "subject": self.subject_id.as_ref().map(|id| json!({
                "id": id,
                "name": self.subject_name,
            })),
            "isOpen": is_open,
            "presentCount": self.present_count,
            "uniqueDevices": self.unique_devices,
        })
    }
}

const SESSION_SELECT: &str =
    "SELECT s.id, s.code, s.title, s.starts_at, s.ends_at, s.is_active, s.session_date,
            s.time_slot, s.teacher_id, t.full_name, s.subject_id, sub.name,
            (SELECT COUNT(*) FROM records r WHERE r.session_id = s.id),
            (SELECT COUNT(DISTINCT r.device_fingerprint) FROM records r WHERE r.session_id = s.id)
     FROM sessions s
     LEFT JOIN teachers t ON t.id = s.teacher_id
     LEFT JOIN subjects sub ON sub.id = s.subject_id";

fn row_to_session(r: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: r.get(0)?,
        code: r.get(1)?,
        title: r.get(2)?,
        starts_at: r.get(3)?,
        ends_at: r.get(4)?,
        is_active: r.get::<_, i64>(5)? != 0,
        session_date: r.get(6)?,
        time_slot: r.get(7)?,
        teacher_id: r.get(8)?,
        teacher_name: r.get(9)?,
        subject_id: r.get(10)?,
        subject_name: r.get(11)?,
        present_count: r.get(12)?,
        unique_devices: r.get(13)?,
    })
}

fn session_by_code(conn: &Connection, code: &str) -> Result<SessionRow, HandlerErr> {
    let sql = format!("{SESSION_SELECT} WHERE s.code = ?");
    conn.query_row(&sql, [code], |r| row_to_session(r))
        .optional()
        .map_err(db_query_failed)?
        .ok_or_else(session_not_found)
}

fn session_start(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let title = get_required_trimmed(params, "title")?;
    let time_slot = get_required_trimmed(params, "timeSlot")?;
    let teacher_id = get_required_trimmed(params, "teacherId")?;
    let subject_id = get_required_trimmed(params, "subjectId")?;
    let duration = params
        .get("durationMinutes")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_DURATION_MINUTES);

    // Unknown teacher/subject ids fall back to a null reference rather than
    // failing the start.
    let teacher_ref: Option<String> = conn
        .query_row("SELECT id FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query_failed)?;
    let subject_ref: Option<String> = conn
        .query_row("SELECT id FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query_failed)?;

    let code = token::url_safe_token(8)
        .map_err(|e| HandlerErr::new("token_failed", e.to_string()))?;
    let now = Utc::now();
    let ends_at = now + Duration::minutes(duration);
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions(id, title, code, starts_at, ends_at, is_active, session_date,
                              time_slot, teacher_id, subject_id)
         VALUES(?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
        (
            &id,
            &title,
            &code,
            db::fmt_ts(now),
            db::fmt_ts(ends_at),
            now.date_naive().to_string(),
            &time_slot,
            &teacher_ref,
            &subject_ref,
        ),
    )
    .map_err(db_update_failed)?;

    let session = session_by_code(conn, &code)?;
    let is_open = admission::is_open(&session.window()?, Utc::now());
    Ok(session.to_json(is_open))
}

fn session_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let limit = params
        .get("limit")
        .and_then(|v| v.as_i64())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_LIST_LIMIT);
    let sql = format!("{SESSION_SELECT} ORDER BY s.starts_at DESC, s.rowid DESC LIMIT ?");
    let mut stmt = conn.prepare(&sql).map_err(db_query_failed)?;
    let rows = stmt
        .query_map([limit], |r| row_to_session(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;

    let now = Utc::now();
    let mut open_count = 0;
    let mut sessions = Vec::with_capacity(rows.len());
    for row in &rows {
        let is_open = admission::is_open(&row.window()?, now);
        if is_open {
            open_count += 1;
        }
        sessions.push(row.to_json(is_open));
    }
    Ok(json!({ "sessions": sessions, "openCount": open_count }))
}

fn session_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_trimmed(params, "code")?;
    let session = session_by_code(conn, &code)?;
    let is_open = admission::is_open(&session.window()?, Utc::now());
    Ok(session.to_json(is_open))
}

/// Stop never extends a session: ends_at only moves backward (to now), and
/// a stopped session is never reopened.
fn session_stop(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_trimmed(params, "code")?;
    let session = session_by_code(conn, &code)?;
    let now = Utc::now();
    let current_end = db::parse_ts(&session.ends_at).map_err(db_query_failed)?;
    let clamped = current_end.min(now);
    conn.execute(
        "UPDATE sessions SET is_active = 0, ends_at = ? WHERE id = ?",
        (db::fmt_ts(clamped), &session.id),
    )
    .map_err(db_update_failed)?;
    let session = session_by_code(conn, &code)?;
    Ok(session.to_json(false))
}

fn session_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_trimmed(params, "code")?;
    let affected = conn
        .execute("DELETE FROM sessions WHERE code = ?", [&code])
        .map_err(db_update_failed)?;
    if affected == 0 {
        return Err(session_not_found());
    }
    Ok(json!({ "deleted": true }))
}

fn session_records(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_trimmed(params, "code")?;
    let session = session_by_code(conn, &code)?;
    let mut stmt = conn
        .prepare(
            "SELECT r.id, s.student_id, s.full_name, r.scanned_at
             FROM records r
             JOIN students s ON s.id = r.student_id
             WHERE r.session_id = ?
             ORDER BY r.scanned_at DESC, r.rowid DESC",
        )
        .map_err(db_query_failed)?;
    let records = stmt
        .query_map([&session.id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "fullName": r.get::<_, String>(2)?,
                "scannedAt": r.get::<_, String>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;
    let count = records.len();
    Ok(json!({ "records": records, "count": count }))
}

fn record_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_trimmed(params, "code")?;
    let record_id = get_required_trimmed(params, "recordId")?;
    let session = session_by_code(conn, &code)?;
    let affected = conn
        .execute(
            "DELETE FROM records WHERE id = ? AND session_id = ?",
            (&record_id, &session.id),
        )
        .map_err(db_update_failed)?;
    if affected == 0 {
        return Err(not_found("record"));
    }
    Ok(json!({ "deleted": true }))
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
        "session.start" => Some(gated(state, req, session_start)),
        "session.list" => Some(gated(state, req, session_list)),
        "session.get" => Some(gated(state, req, session_get)),
        "session.stop" => Some(gated(state, req, session_stop)),
        "session.delete" => Some(gated(state, req, session_delete)),
        "session.records" => Some(gated(state, req, session_records)),
        "record.delete" => Some(gated(state, req, record_delete)),
        _ => None,
    }
}
