use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{bad_params, db_query_failed, get_opt_str, require_auth, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, ReportFilters, SessionSummary};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};

fn parse_filters(params: &Value) -> Result<ReportFilters, HandlerErr> {
    let parse_date = |key: &str| -> Result<Option<NaiveDate>, HandlerErr> {
        match get_opt_str(params, key) {
            Some(raw) => raw
                .parse::<NaiveDate>()
                .map(Some)
                .map_err(|_| bad_params(format!("{key} must be YYYY-MM-DD"))),
            None => Ok(None),
        }
    };
    Ok(ReportFilters {
        teacher_id: get_opt_str(params, "teacherId"),
        subject_id: get_opt_str(params, "subjectId"),
        date_from: parse_date("dateFrom")?,
        date_to: parse_date("dateTo")?,
    })
}

fn session_row_json(s: &SessionSummary) -> Value {
    json!({
        "code": s.code,
        "title": s.title,
        "teacher": s.teacher_name,
        "subject": s.subject_name,
        "slot": s.time_slot,
        "start": s.starts_at,
        "end": s.ends_at,
        "presentCount": s.present_count,
    })
}

fn reports_metrics(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let filters = parse_filters(params)?;
    let summaries = report::load_summaries(conn, &filters).map_err(db_query_failed)?;
    let metrics = report::aggregate(&summaries);
    Ok(json!({
        "metrics": {
            "totalPresent": metrics.total_present,
            "totalSessions": metrics.total_sessions,
            "uniqueDevices": metrics.unique_devices,
        },
        "chart": {
            "subjects": {
                "labels": metrics.by_subject.labels,
                "counts": metrics.by_subject.counts,
            },
            "teachers": {
                "labels": metrics.by_teacher.labels,
                "counts": metrics.by_teacher.counts,
            },
        },
        "sessions": summaries.iter().map(session_row_json).collect::<Vec<_>>(),
    }))
}

/// Pure projection of the filtered set, one row per session. Serializing
/// these rows into CSV bytes is the frontend's job.
fn reports_export(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let filters = parse_filters(params)?;
    let summaries = report::load_summaries(conn, &filters).map_err(db_query_failed)?;
    Ok(json!({
        "columns": ["code", "title", "teacher", "subject", "slot", "start", "end", "presentCount"],
        "rows": summaries.iter().map(session_row_json).collect::<Vec<_>>(),
    }))
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
        "reports.metrics" => Some(gated(state, req, reports_metrics)),
        "reports.export" => Some(gated(state, req, reports_export)),
        _ => None,
    }
}
