use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{exists_active, sort_clause, str_param};
use crate::ipc::types::{AppState, Request};
use crate::tags;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn username_taken(
    conn: &rusqlite::Connection,
    username: &str,
    exclude_id: Option<&str>,
) -> rusqlite::Result<bool> {
    let found: Option<i64> = match exclude_id {
        Some(id) => conn
            .query_row(
                "SELECT 1 FROM teachers WHERE username = ? AND id <> ? AND is_deleted = 0",
                [username, id],
                |r| r.get(0),
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT 1 FROM teachers WHERE username = ? AND is_deleted = 0",
                [username],
                |r| r.get(0),
            )
            .optional()?,
    };
    Ok(found.is_some())
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };

    let order = sort_clause(
        &req.params,
        &[("name", "t.name"), ("username", "t.username")],
        "t.created_at",
    );
    let sql = format!(
        "SELECT t.id, t.username, t.name, t.address, t.mobile,
                (SELECT COUNT(*) FROM classes c
                 WHERE c.teacher_id = t.id AND c.is_deleted = 0) AS class_count
         FROM teachers t
         WHERE t.is_deleted = 0
         ORDER BY {}",
        order
    );

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let username: String = row.get(1)?;
            let name: String = row.get(2)?;
            let address: Option<String> = row.get(3)?;
            let mobile: Option<String> = row.get(4)?;
            let class_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "username": username,
                "name": name,
                "address": address,
                "mobile": mobile,
                "classCount": class_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(username) = str_param(&req.params, "username") else {
        return err(&req.id, "bad_params", "Username harus diisi.", None);
    };
    let Some(name) = str_param(&req.params, "name") else {
        return err(&req.id, "bad_params", "Nama guru harus diisi.", None);
    };
    let address = str_param(&req.params, "address");
    let mobile = str_param(&req.params, "mobile");

    match username_taken(conn, &username, None) {
        Ok(true) => return err(&req.id, "duplicate", "Username sudah digunakan.", None),
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, username, name, address, mobile, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &teacher_id,
            &username,
            &name,
            address.as_deref(),
            mobile.as_deref(),
            db::now_utc(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            "Terjadi kesalahan saat menambahkan data guru.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state.tags.bump(&[tags::TEACHERS, tags::STATS]);
    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };
    let Some(username) = str_param(&req.params, "username") else {
        return err(&req.id, "bad_params", "Username harus diisi.", None);
    };
    let Some(name) = str_param(&req.params, "name") else {
        return err(&req.id, "bad_params", "Nama guru harus diisi.", None);
    };
    let address = str_param(&req.params, "address");
    let mobile = str_param(&req.params, "mobile");

    match exists_active(conn, "teachers", &id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "Guru tidak ditemukan.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match username_taken(conn, &username, Some(&id)) {
        Ok(true) => return err(&req.id, "duplicate", "Username sudah digunakan.", None),
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "UPDATE teachers SET username = ?, name = ?, address = ?, mobile = ?, updated_at = ?
         WHERE id = ?",
        (
            &username,
            &name,
            address.as_deref(),
            mobile.as_deref(),
            db::now_utc(),
            &id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            "Terjadi kesalahan saat memperbarui data guru.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state
        .tags
        .bump(&[tags::TEACHERS, tags::CLASSES, tags::STATS]);
    ok(&req.id, json!({ "teacherId": id }))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    match exists_active(conn, "teachers", &id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "Guru tidak ditemukan.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // The filtered index releases the username the moment the row is
    // flagged; the stored username stays intact.
    if let Err(e) = conn.execute(
        "UPDATE teachers SET is_deleted = 1, deleted_at = ? WHERE id = ?",
        (db::now_utc(), &id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            "Terjadi kesalahan saat menghapus data guru.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state
        .tags
        .bump(&[tags::TEACHERS, tags::CLASSES, tags::STATS]);
    ok(&req.id, json!({ "teacherId": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        _ => None,
    }
}
