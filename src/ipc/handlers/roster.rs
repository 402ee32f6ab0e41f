use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_query_failed, db_update_failed, get_required_trimmed, not_found, require_auth, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

fn students_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT student_id, full_name, active FROM students ORDER BY student_id")
        .map_err(db_query_failed)?;
    let students = stmt
        .query_map([], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "active": r.get::<_, i64>(2)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_trimmed(params, "studentId")?;
    let full_name = get_required_trimmed(params, "fullName")?;
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query_failed)?;
    let created = existing.is_none();
    if created {
        conn.execute(
            "INSERT INTO students(id, student_id, full_name, active) VALUES(?, ?, ?, 1)",
            (Uuid::new_v4().to_string(), &student_id, &full_name),
        )
        .map_err(db_update_failed)?;
    }
    Ok(json!({ "created": created, "studentId": student_id }))
}

fn students_toggle_active(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_trimmed(params, "studentId")?;
    let affected = conn
        .execute(
            "UPDATE students SET active = 1 - active WHERE student_id = ?",
            [&student_id],
        )
        .map_err(db_update_failed)?;
    if affected == 0 {
        return Err(not_found("student"));
    }
    let active: i64 = conn
        .query_row(
            "SELECT active FROM students WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .map_err(db_query_failed)?;
    Ok(json!({ "studentId": student_id, "active": active != 0 }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_trimmed(params, "studentId")?;
    // Cascades the student's attendance records.
    let affected = conn
        .execute("DELETE FROM students WHERE student_id = ?", [&student_id])
        .map_err(db_update_failed)?;
    if affected == 0 {
        return Err(not_found("student"));
    }
    Ok(json!({ "deleted": true }))
}

fn teachers_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, full_name FROM teachers ORDER BY full_name")
        .map_err(db_query_failed)?;
    let teachers = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;
    Ok(json!({ "teachers": teachers }))
}

fn teachers_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let full_name = get_required_trimmed(params, "fullName")?;
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM teachers WHERE full_name = ?",
            [&full_name],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query_failed)?;
    if let Some(id) = existing {
        return Ok(json!({ "created": false, "id": id }));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, full_name) VALUES(?, ?)",
        (&id, &full_name),
    )
    .map_err(db_update_failed)?;
    Ok(json!({ "created": true, "id": id }))
}

/// Dependent sessions keep their history: the foreign key nulls the
/// reference instead of cascading.
fn teachers_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_trimmed(params, "id")?;
    let affected = conn
        .execute("DELETE FROM teachers WHERE id = ?", [&id])
        .map_err(db_update_failed)?;
    if affected == 0 {
        return Err(not_found("teacher"));
    }
    Ok(json!({ "deleted": true }))
}

fn subjects_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM subjects ORDER BY name")
        .map_err(db_query_failed)?;
    let subjects = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_trimmed(params, "name")?;
    let existing: Option<String> = conn
        .query_row("SELECT id FROM subjects WHERE name = ?", [&name], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query_failed)?;
    if let Some(id) = existing {
        return Ok(json!({ "created": false, "id": id }));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO subjects(id, name) VALUES(?, ?)", (&id, &name))
        .map_err(db_update_failed)?;
    Ok(json!({ "created": true, "id": id }))
}

fn subjects_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_trimmed(params, "id")?;
    let affected = conn
        .execute("DELETE FROM subjects WHERE id = ?", [&id])
        .map_err(db_update_failed)?;
    if affected == 0 {
        return Err(not_found("subject"));
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
        "students.list" => Some(gated(state, req, students_list)),
        "students.create" => Some(gated(state, req, students_create)),
        "students.toggleActive" => Some(gated(state, req, students_toggle_active)),
        "students.delete" => Some(gated(state, req, students_delete)),
        "teachers.list" => Some(gated(state, req, teachers_list)),
        "teachers.create" => Some(gated(state, req, teachers_create)),
        "teachers.delete" => Some(gated(state, req, teachers_delete)),
        "subjects.list" => Some(gated(state, req, subjects_list)),
        "subjects.create" => Some(gated(state, req, subjects_create)),
        "subjects.delete" => Some(gated(state, req, subjects_delete)),
        _ => None,
    }
}
