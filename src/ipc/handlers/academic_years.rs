use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{exists_active, str_param};
use crate::ipc::types::{AppState, Request};
use crate::tags;
use regex::Regex;
use rusqlite::OptionalExtension;
use serde_json::json;
use std::sync::OnceLock;
use uuid::Uuid;

fn year_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}/\d{4}$").expect("year pattern"))
}

const FORMAT_MSG: &str =
    "Format tahun ajaran tidak valid. Gunakan format YYYY/YYYY (contoh: 2024/2025).";

fn handle_years_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "academicYears": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, year FROM academic_years
         WHERE is_deleted = 0
         ORDER BY year",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let year: String = row.get(1)?;
            Ok(json!({ "id": id, "year": year }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(years) => ok(&req.id, json!({ "academicYears": years })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_years_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(year) = str_param(&req.params, "year") else {
        return err(&req.id, "bad_params", "Tahun ajaran harus diisi.", None);
    };
    if !year_pattern().is_match(&year) {
        return err(&req.id, "bad_params", FORMAT_MSG, None);
    }

    let taken: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM academic_years WHERE year = ? AND is_deleted = 0",
            [&year],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(&req.id, "duplicate", "Tahun ajaran sudah ada.", None);
    }

    let year_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO academic_years(id, year, created_at) VALUES(?, ?, ?)",
        (&year_id, &year, db::now_utc()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            "Terjadi kesalahan saat menambahkan data tahun ajaran.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state.tags.bump(&[tags::ACADEMIC_YEARS]);
    ok(&req.id, json!({ "academicYearId": year_id }))
}

fn handle_years_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };
    let Some(year) = str_param(&req.params, "year") else {
        return err(&req.id, "bad_params", "Tahun ajaran harus diisi.", None);
    };
    if !year_pattern().is_match(&year) {
        return err(&req.id, "bad_params", FORMAT_MSG, None);
    }

    match exists_active(conn, "academic_years", &id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "Tahun ajaran tidak ditemukan.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let taken: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM academic_years WHERE year = ? AND id <> ? AND is_deleted = 0",
            [&year, &id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(&req.id, "duplicate", "Tahun ajaran sudah ada.", None);
    }

    if let Err(e) = conn.execute(
        "UPDATE academic_years SET year = ?, updated_at = ? WHERE id = ?",
        (&year, db::now_utc(), &id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            "Terjadi kesalahan saat memperbarui data tahun ajaran.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state.tags.bump(&[tags::ACADEMIC_YEARS]);
    ok(&req.id, json!({ "academicYearId": id }))
}

fn handle_years_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    match exists_active(conn, "academic_years", &id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "Tahun ajaran tidak ditemukan.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "UPDATE academic_years SET is_deleted = 1, deleted_at = ? WHERE id = ?",
        (db::now_utc(), &id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            "Terjadi kesalahan saat menghapus data tahun ajaran.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state.tags.bump(&[tags::ACADEMIC_YEARS]);
    ok(&req.id, json!({ "academicYearId": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "academicYears.list" => Some(handle_years_list(state, req)),
        "academicYears.create" => Some(handle_years_create(state, req)),
        "academicYears.update" => Some(handle_years_update(state, req)),
        "academicYears.delete" => Some(handle_years_delete(state, req)),
        _ => None,
    }
}
