use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_query_failed, db_update_failed, require_auth, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

const DEMO_TEACHERS: [&str; 3] = ["Prof. Ada Lovelace", "Dr. Alan Turing", "Dr. Grace Hopper"];
const DEMO_SUBJECTS: [&str; 3] = ["Mathematics", "Computer Science", "Physics"];
const DEFAULT_STUDENT_COUNT: i64 = 30;

fn seed_meta(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut teachers_created = 0;
    for name in DEMO_TEACHERS {
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM teachers WHERE full_name = ?", [name], |r| {
                r.get(0)
            })
            .optional()
            .map_err(db_query_failed)?;
        if exists.is_none() {
            conn.execute(
                "INSERT INTO teachers(id, full_name) VALUES(?, ?)",
                (Uuid::new_v4().to_string(), name),
            )
            .map_err(db_update_failed)?;
            teachers_created += 1;
        }
    }
    let mut subjects_created = 0;
    for name in DEMO_SUBJECTS {
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM subjects WHERE name = ?", [name], |r| {
                r.get(0)
            })
            .optional()
            .map_err(db_query_failed)?;
        if exists.is_none() {
            conn.execute(
                "INSERT INTO subjects(id, name) VALUES(?, ?)",
                (Uuid::new_v4().to_string(), name),
            )
            .map_err(db_update_failed)?;
            subjects_created += 1;
        }
    }
    Ok(json!({
        "teachersCreated": teachers_created,
        "subjectsCreated": subjects_created,
    }))
}

fn seed_students(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let count = params
        .get("count")
        .and_then(|v| v.as_i64())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_STUDENT_COUNT);
    let mut created = 0;
    for i in 1..=count {
        let student_id = format!("S{i:03}");
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM students WHERE student_id = ?",
                [&student_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_query_failed)?;
        if exists.is_none() {
            conn.execute(
                "INSERT INTO students(id, student_id, full_name, active) VALUES(?, ?, ?, 1)",
                (
                    Uuid::new_v4().to_string(),
                    &student_id,
                    format!("Student {i:03}"),
                ),
            )
            .map_err(db_update_failed)?;
            created += 1;
        }
    }
    Ok(json!({ "created": created, "requested": count }))
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
        "seed.meta" => Some(gated(state, req, seed_meta)),
        "seed.students" => Some(gated(state, req, seed_students)),
        _ => None,
    }
}
