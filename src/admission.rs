use crate::db;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

/// Fingerprints are coarse by design (shared NAT collides); they only exist
/// to stop casual proxy scanning from one device.
const FINGERPRINT_MAX_CHARS: usize = 120;

/// The four session fields the open/closed decision depends on.
#[derive(Debug, Clone)]
pub struct SessionWindow {
    pub is_active: bool,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// A session accepts scans iff it is active and `now` sits inside its time
/// bounds, both ends inclusive. Pure; dashboards reuse it for status display.
pub fn is_open(window: &SessionWindow, now: DateTime<Utc>) -> bool {
    window.is_active && window.starts_at <= now && now <= window.ends_at
}

pub struct ScanOrigin<'a> {
    pub client_ip: &'a str,
    pub user_agent: &'a str,
}

pub fn device_fingerprint(client_ip: &str, user_agent: &str) -> String {
    let raw = format!("{client_ip}|{user_agent}");
    raw.chars().take(FINGERPRINT_MAX_CHARS).collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanPolicy {
    /// When set, unknown identifiers are rejected instead of
    /// self-registering a student row on first scan.
    pub require_registered: bool,
}

impl ScanPolicy {
    pub const SETTINGS_KEY: &'static str = "setup.scan";

    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let stored = db::settings_get_json(conn, Self::SETTINGS_KEY)?;
        let require_registered = stored
            .as_ref()
            .and_then(|v| v.get("requireRegistered"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok(Self { require_registered })
    }
}

/// Which uniqueness constraint stopped a duplicate. Internal only: the wire
/// response collapses both into one `duplicate_scan` error so a reply never
/// reveals whether this device already scanned for a different student.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKind {
    StudentAlreadyScanned,
    DeviceAlreadyScanned,
}

#[derive(Debug, Clone)]
pub struct AdmittedRecord {
    pub record_id: String,
    pub student_id: String,
    pub full_name: String,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum Admission {
    Granted(AdmittedRecord),
    SessionNotFound,
    SessionClosed,
    MissingIdentifier,
    UnknownStudent,
    Duplicate(DuplicateKind),
}

/// One scan attempt. Student lookup-or-create and the record insert run in
/// a single transaction, so a duplicate rejection never leaves behind a
/// student row that was lazily created on this attempt. Dedup authority is
/// the database's UNIQUE constraints, not a check-then-act read.
pub fn admit(
    conn: &Connection,
    code: &str,
    raw_student_id: &str,
    origin: &ScanOrigin,
    policy: &ScanPolicy,
    now: DateTime<Utc>,
) -> anyhow::Result<Admission> {
    let Some((session_row_id, window)) = lookup_session(conn, code)? else {
        return Ok(Admission::SessionNotFound);
    };
    if !is_open(&window, now) {
        return Ok(Admission::SessionClosed);
    }
    let student_id = raw_student_id.trim();
    if student_id.is_empty() {
        return Ok(Admission::MissingIdentifier);
    }
    let fingerprint = device_fingerprint(origin.client_ip, origin.user_agent);

    let tx = conn.unchecked_transaction()?;
    let existing: Option<(String, String)> = tx
        .query_row(
            "SELECT id, full_name FROM students WHERE student_id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let (student_row_id, full_name) = match existing {
        Some(v) => v,
        None if policy.require_registered => return Ok(Admission::UnknownStudent),
        None => {
            // Self-registration: the identifier doubles as the name until
            // someone edits the roster.
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO students(id, student_id, full_name, active) VALUES(?, ?, ?, 1)",
                (&id, student_id, student_id),
            )?;
            (id, student_id.to_string())
        }
    };

    let record_id = Uuid::new_v4().to_string();
    let inserted = tx.execute(
        "INSERT INTO records(id, session_id, student_id, scanned_at, device_fingerprint)
         VALUES(?, ?, ?, ?, ?)",
        (
            &record_id,
            &session_row_id,
            &student_row_id,
            &db::fmt_ts(now),
            &fingerprint,
        ),
    );
    match inserted {
        Ok(_) => {
            tx.commit()?;
            Ok(Admission::Granted(AdmittedRecord {
                record_id,
                student_id: student_id.to_string(),
                full_name,
                scanned_at: now,
            }))
        }
        Err(e) if is_unique_violation(&e) => {
            // Dropping the transaction rolls back any lazily created student.
            drop(tx);
            let kind = duplicate_kind(conn, &session_row_id, student_id)?;
            Ok(Admission::Duplicate(kind))
        }
        Err(e) => Err(e.into()),
    }
}

fn lookup_session(
    conn: &Connection,
    code: &str,
) -> anyhow::Result<Option<(String, SessionWindow)>> {
    let row: Option<(String, i64, String, String)> = conn
        .query_row(
            "SELECT id, is_active, starts_at, ends_at FROM sessions WHERE code = ?",
            [code],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((id, is_active, starts_at, ends_at)) = row else {
        return Ok(None);
    };
    Ok(Some((
        id,
        SessionWindow {
            is_active: is_active != 0,
            starts_at: db::parse_ts(&starts_at)?,
            ends_at: db::parse_ts(&ends_at)?,
        },
    )))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn duplicate_kind(
    conn: &Connection,
    session_row_id: &str,
    student_id: &str,
) -> anyhow::Result<DuplicateKind> {
    let student_hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM records r
             JOIN students s ON s.id = r.student_id
             WHERE r.session_id = ? AND s.student_id = ?",
            (session_row_id, student_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(if student_hit.is_some() {
        DuplicateKind::StudentAlreadyScanned
    } else {
        DuplicateKind::DeviceAlreadyScanned
    })
}
