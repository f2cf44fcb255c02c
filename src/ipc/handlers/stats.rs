use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn count(conn: &rusqlite::Connection, sql: &str) -> rusqlite::Result<i64> {
    conn.query_row(sql, [], |r| r.get(0))
}

fn handle_dashboard(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let counts = count(conn, "SELECT COUNT(*) FROM students WHERE is_deleted = 0")
        .and_then(|students| {
            Ok((
                students,
                count(conn, "SELECT COUNT(*) FROM teachers WHERE is_deleted = 0")?,
                count(conn, "SELECT COUNT(*) FROM classes WHERE is_deleted = 0")?,
                count(
                    conn,
                    "SELECT COUNT(*) FROM development_aspects WHERE is_deleted = 0",
                )?,
                count(
                    conn,
                    "SELECT COUNT(*) FROM development_indicators WHERE is_deleted = 0",
                )?,
                count(
                    conn,
                    "SELECT COUNT(*) FROM development_assessments
                     WHERE is_deleted = 0 AND date(created_at) = date('now')",
                )?,
            ))
        });

    match counts {
        Ok((students, teachers, classes, aspects, indicators, assessments_today)) => ok(
            &req.id,
            json!({
                "students": students,
                "teachers": teachers,
                "classes": classes,
                "aspects": aspects,
                "indicators": indicators,
                "assessmentsToday": assessments_today
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.dashboard" => Some(handle_dashboard(state, req)),
        _ => None,
    }
}
