use chrono::NaiveDate;
use rusqlite::Connection;

const UNASSIGNED: &str = "Unassigned";

/// Conjunction of optional filters over sessions. Dates are inclusive and
/// compare against the session's start date.
#[derive(Debug, Clone, Default)]
pub struct ReportFilters {
    pub teacher_id: Option<String>,
    pub subject_id: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

/// One session as the report views see it: resolved names plus the two
/// per-session counts.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub code: String,
    pub title: String,
    pub teacher_name: Option<String>,
    pub subject_name: Option<String>,
    pub time_slot: String,
    pub starts_at: String,
    pub ends_at: String,
    pub present_count: i64,
    pub unique_devices: i64,
}

pub fn load_summaries(
    conn: &Connection,
    filters: &ReportFilters,
) -> anyhow::Result<Vec<SessionSummary>> {
    let mut sql = String::from(
        "SELECT s.code, s.title, t.full_name, sub.name, s.time_slot, s.starts_at, s.ends_at,
                (SELECT COUNT(*) FROM records r WHERE r.session_id = s.id),
                (SELECT COUNT(DISTINCT r.device_fingerprint) FROM records r WHERE r.session_id = s.id)
         FROM sessions s
         LEFT JOIN teachers t ON t.id = s.teacher_id
         LEFT JOIN subjects sub ON sub.id = s.subject_id",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(teacher_id) = &filters.teacher_id {
        clauses.push("s.teacher_id = ?");
        params.push(Box::new(teacher_id.clone()));
    }
    if let Some(subject_id) = &filters.subject_id {
        clauses.push("s.subject_id = ?");
        params.push(Box::new(subject_id.clone()));
    }
    if let Some(from) = &filters.date_from {
        clauses.push("date(s.starts_at) >= ?");
        params.push(Box::new(from.to_string()));
    }
    if let Some(to) = &filters.date_to {
        clauses.push("date(s.starts_at) <= ?");
        params.push(Box::new(to.to_string()));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY s.starts_at DESC, s.rowid DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            |r| {
                Ok(SessionSummary {
                    code: r.get(0)?,
                    title: r.get(1)?,
                    teacher_name: r.get(2)?,
                    subject_name: r.get(3)?,
                    time_slot: r.get(4)?,
                    starts_at: r.get(5)?,
                    ends_at: r.get(6)?,
                    present_count: r.get(7)?,
                    unique_devices: r.get(8)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Present-count buckets in first-seen order, kept as parallel label/count
/// arrays because that is what the chart frontend consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Breakdown {
    pub labels: Vec<String>,
    pub counts: Vec<i64>,
}

impl Breakdown {
    fn add(&mut self, label: &str, count: i64) {
        match self.labels.iter().position(|l| l == label) {
            Some(i) => self.counts[i] += count,
            None => {
                self.labels.push(label.to_string());
                self.counts.push(count);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Metrics {
    pub total_present: i64,
    pub total_sessions: i64,
    /// Sum of per-session distinct fingerprints, not globally distinct.
    pub unique_devices: i64,
    pub by_subject: Breakdown,
    pub by_teacher: Breakdown,
}

pub fn aggregate(summaries: &[SessionSummary]) -> Metrics {
    let mut metrics = Metrics {
        total_sessions: summaries.len() as i64,
        ..Metrics::default()
    };
    for s in summaries {
        metrics.total_present += s.present_count;
        metrics.unique_devices += s.unique_devices;
        let subject = s.subject_name.as_deref().unwrap_or(UNASSIGNED);
        let teacher = s.teacher_name.as_deref().unwrap_or(UNASSIGNED);
        metrics.by_subject.add(subject, s.present_count);
        metrics.by_teacher.add(teacher, s.present_count);
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::{Duration, Utc};
    use rusqlite::Connection;

    fn summary(subject: Option<&str>, teacher: Option<&str>, present: i64) -> SessionSummary {
        SessionSummary {
            code: "c".into(),
            title: "t".into(),
            teacher_name: teacher.map(Into::into),
            subject_name: subject.map(Into::into),
            time_slot: "".into(),
            starts_at: "2026-01-05T09:00:00.000Z".into(),
            ends_at: "2026-01-05T10:00:00.000Z".into(),
            present_count: present,
            unique_devices: present,
        }
    }

    #[test]
    fn subject_breakdown_merges_buckets_in_first_seen_order() {
        let sessions = [
            summary(Some("Math"), Some("Prof. A"), 3),
            summary(Some("Math"), Some("Prof. A"), 0),
            summary(Some("CS"), Some("Prof. B"), 5),
        ];
        let m = aggregate(&sessions);
        assert_eq!(m.total_present, 8);
        assert_eq!(m.total_sessions, 3);
        assert_eq!(m.unique_devices, 8);
        assert_eq!(m.by_subject.labels, vec!["Math", "CS"]);
        assert_eq!(m.by_subject.counts, vec![3, 5]);
    }

    #[test]
    fn missing_references_bucket_under_unassigned() {
        let sessions = [
            summary(None, None, 2),
            summary(Some("Math"), None, 1),
            summary(None, None, 4),
        ];
        let m = aggregate(&sessions);
        assert_eq!(m.by_subject.labels, vec!["Unassigned", "Math"]);
        assert_eq!(m.by_subject.counts, vec![6, 1]);
        assert_eq!(m.by_teacher.labels, vec!["Unassigned"]);
        assert_eq!(m.by_teacher.counts, vec![7]);
    }

    #[test]
    fn unique_devices_sum_per_session_not_globally() {
        // The same device in two sessions counts twice.
        let sessions = [summary(Some("Math"), None, 1), summary(Some("Math"), None, 1)];
        let m = aggregate(&sessions);
        assert_eq!(m.unique_devices, 2);
    }

    #[test]
    fn load_summaries_applies_filter_conjunction() {
        let conn = Connection::open_in_memory().expect("open db");
        db::init_schema(&conn).expect("schema");
        conn.execute(
            "INSERT INTO teachers(id, full_name) VALUES('t1', 'Prof. Ada Lovelace')",
            [],
        )
        .expect("teacher");
        let now = Utc::now();
        let earlier = now - Duration::days(10);
        for (id, code, teacher, starts) in [
            ("s1", "AAA", Some("t1"), now),
            ("s2", "BBB", Some("t1"), earlier),
            ("s3", "CCC", None, now),
        ] {
            conn.execute(
                "INSERT INTO sessions(id, title, code, starts_at, ends_at, is_active, session_date, time_slot, teacher_id)
                 VALUES(?, 'T', ?, ?, ?, 1, ?, '', ?)",
                (
                    id,
                    code,
                    db::fmt_ts(starts),
                    db::fmt_ts(starts + Duration::minutes(30)),
                    starts.date_naive().to_string(),
                    teacher,
                ),
            )
            .expect("session");
        }

        let all = load_summaries(&conn, &ReportFilters::default()).expect("load");
        assert_eq!(all.len(), 3);

        let filtered = load_summaries(
            &conn,
            &ReportFilters {
                teacher_id: Some("t1".into()),
                date_from: Some((now - Duration::days(1)).date_naive()),
                ..ReportFilters::default()
            },
        )
        .expect("load");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].code, "AAA");
        assert_eq!(
            filtered[0].teacher_name.as_deref(),
            Some("Prof. Ada Lovelace")
        );
    }
}
