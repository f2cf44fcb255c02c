use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{exists_active, i64_param, sort_clause, str_param};
use crate::ipc::types::{AppState, Request};
use crate::tags;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn nis_taken(
    conn: &rusqlite::Connection,
    nis: &str,
    exclude_id: Option<&str>,
) -> rusqlite::Result<bool> {
    let found: Option<i64> = match exclude_id {
        Some(id) => conn
            .query_row(
                "SELECT 1 FROM students WHERE nis = ? AND id <> ? AND is_deleted = 0",
                [nis, id],
                |r| r.get(0),
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT 1 FROM students WHERE nis = ? AND is_deleted = 0",
                [nis],
                |r| r.get(0),
            )
            .optional()?,
    };
    Ok(found.is_some())
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(nis) = str_param(&req.params, "nis") else {
        return err(&req.id, "bad_params", "NIS harus diisi.", None);
    };
    let Some(name) = str_param(&req.params, "name") else {
        return err(&req.id, "bad_params", "Nama siswa harus diisi.", None);
    };
    let Some(class_id) = str_param(&req.params, "classId") else {
        return err(&req.id, "bad_params", "Kelas harus dipilih.", None);
    };
    let gender = str_param(&req.params, "gender");
    let birth_place = str_param(&req.params, "birthPlace");
    let birth_date = str_param(&req.params, "birthDate");
    let religion = str_param(&req.params, "religion");
    let address = str_param(&req.params, "address");
    let father_name = str_param(&req.params, "fatherName");
    let mother_name = str_param(&req.params, "motherName");

    match nis_taken(conn, &nis, None) {
        Ok(true) => return err(&req.id, "duplicate", "NIS sudah digunakan.", None),
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match exists_active(conn, "classes", &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "Kelas tidak ditemukan.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(
           id, nis, name, gender, birth_place, birth_date, religion,
           address, father_name, mother_name, class_id, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &nis,
            &name,
            gender.as_deref(),
            birth_place.as_deref(),
            birth_date.as_deref(),
            religion.as_deref(),
            address.as_deref(),
            father_name.as_deref(),
            mother_name.as_deref(),
            &class_id,
            db::now_utc(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            "Terjadi kesalahan saat menambahkan data siswa.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state
        .tags
        .bump(&[tags::STUDENT, tags::STUDENTS, tags::CLASSES, tags::STATS]);
    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };
    let Some(nis) = str_param(&req.params, "nis") else {
        return err(&req.id, "bad_params", "NIS harus diisi.", None);
    };
    let Some(name) = str_param(&req.params, "name") else {
        return err(&req.id, "bad_params", "Nama siswa harus diisi.", None);
    };
    let Some(class_id) = str_param(&req.params, "classId") else {
        return err(&req.id, "bad_params", "Kelas harus dipilih.", None);
    };
    let gender = str_param(&req.params, "gender");
    let birth_place = str_param(&req.params, "birthPlace");
    let birth_date = str_param(&req.params, "birthDate");
    let religion = str_param(&req.params, "religion");
    let address = str_param(&req.params, "address");
    let father_name = str_param(&req.params, "fatherName");
    let mother_name = str_param(&req.params, "motherName");

    match exists_active(conn, "students", &id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "Siswa tidak ditemukan.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match nis_taken(conn, &nis, Some(&id)) {
        Ok(true) => return err(&req.id, "duplicate", "NIS sudah digunakan.", None),
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match exists_active(conn, "classes", &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "Kelas tidak ditemukan.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "UPDATE students SET
           nis = ?, name = ?, gender = ?, birth_place = ?, birth_date = ?,
           religion = ?, address = ?, father_name = ?, mother_name = ?,
           class_id = ?, updated_at = ?
         WHERE id = ?",
        (
            &nis,
            &name,
            gender.as_deref(),
            birth_place.as_deref(),
            birth_date.as_deref(),
            religion.as_deref(),
            address.as_deref(),
            father_name.as_deref(),
            mother_name.as_deref(),
            &class_id,
            db::now_utc(),
            &id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            "Terjadi kesalahan saat memperbarui data siswa.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state
        .tags
        .bump(&[tags::STUDENT, tags::STUDENTS, tags::CLASSES, tags::STATS]);
    ok(&req.id, json!({ "studentId": id }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    match exists_active(conn, "students", &id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "Siswa tidak ditemukan.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // The partial unique index only covers live rows, so the NIS is free for
    // reuse the moment the row is flagged. No key rewriting needed.
    if let Err(e) = conn.execute(
        "UPDATE students SET is_deleted = 1, deleted_at = ? WHERE id = ?",
        (db::now_utc(), &id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            "Terjadi kesalahan saat menghapus data siswa.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state
        .tags
        .bump(&[tags::STUDENT, tags::STUDENTS, tags::CLASSES, tags::STATS]);
    ok(&req.id, json!({ "studentId": id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(
            &req.id,
            json!({ "students": [], "totalCount": 0, "currentPage": 1, "totalPages": 0 }),
        );
    };

    let mut where_sql = String::from("s.is_deleted = 0");
    let mut binds: Vec<SqlValue> = Vec::new();

    if let Some(search) = str_param(&req.params, "search") {
        where_sql.push_str(" AND (s.name LIKE ? OR s.nis LIKE ?)");
        let pattern = format!("%{}%", search);
        binds.push(SqlValue::Text(pattern.clone()));
        binds.push(SqlValue::Text(pattern));
    }
    if let Some(class_id) = str_param(&req.params, "classId") {
        where_sql.push_str(" AND s.class_id = ?");
        binds.push(SqlValue::Text(class_id));
    }

    let total_count: i64 = match conn.query_row(
        &format!("SELECT COUNT(*) FROM students s WHERE {}", where_sql),
        params_from_iter(binds.iter()),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let order = sort_clause(
        &req.params,
        &[
            ("name", "s.name"),
            ("nis", "s.nis"),
            ("createdAt", "s.created_at"),
        ],
        "s.created_at",
    );
    let skip = i64_param(&req.params, "skip", 0).max(0);
    let limit = i64_param(&req.params, "limit", 20).clamp(1, 200);

    let sql = format!(
        "SELECT s.id, s.nis, s.name, s.gender, s.birth_place, s.birth_date,
                s.religion, s.class_id, c.name
         FROM students s
         JOIN classes c ON c.id = s.class_id
         WHERE {}
         ORDER BY {}
         LIMIT ? OFFSET ?",
        where_sql, order
    );
    binds.push(SqlValue::Integer(limit));
    binds.push(SqlValue::Integer(skip));

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds.iter()), |row| {
            let id: String = row.get(0)?;
            let nis: String = row.get(1)?;
            let name: String = row.get(2)?;
            let gender: Option<String> = row.get(3)?;
            let birth_place: Option<String> = row.get(4)?;
            let birth_date: Option<String> = row.get(5)?;
            let religion: Option<String> = row.get(6)?;
            let class_id: String = row.get(7)?;
            let class_name: String = row.get(8)?;
            Ok(json!({
                "id": id,
                "nis": nis,
                "name": name,
                "gender": gender,
                "birthPlace": birth_place,
                "birthDate": birth_date,
                "religion": religion,
                "classId": class_id,
                "className": class_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(
            &req.id,
            json!({
                "students": students,
                "totalCount": total_count,
                "currentPage": skip / limit + 1,
                "totalPages": (total_count + limit - 1) / limit,
                "itemsPerPage": limit
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let student = conn
        .query_row(
            "SELECT s.id, s.nis, s.name, s.gender, s.birth_place, s.birth_date,
                    s.religion, s.address, s.father_name, s.mother_name,
                    s.class_id, c.name, c.age_group
             FROM students s
             JOIN classes c ON c.id = s.class_id
             WHERE s.id = ? AND s.is_deleted = 0",
            [&id],
            |row| {
                let sid: String = row.get(0)?;
                let nis: String = row.get(1)?;
                let name: String = row.get(2)?;
                let gender: Option<String> = row.get(3)?;
                let birth_place: Option<String> = row.get(4)?;
                let birth_date: Option<String> = row.get(5)?;
                let religion: Option<String> = row.get(6)?;
                let address: Option<String> = row.get(7)?;
                let father_name: Option<String> = row.get(8)?;
                let mother_name: Option<String> = row.get(9)?;
                let class_id: String = row.get(10)?;
                let class_name: String = row.get(11)?;
                let age_group: String = row.get(12)?;
                Ok(json!({
                    "id": sid,
                    "nis": nis,
                    "name": name,
                    "gender": gender,
                    "birthPlace": birth_place,
                    "birthDate": birth_date,
                    "religion": religion,
                    "address": address,
                    "fatherName": father_name,
                    "motherName": mother_name,
                    "classId": class_id,
                    "className": class_name,
                    "classAgeGroup": age_group
                }))
            },
        )
        .optional();

    match student {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "Siswa tidak ditemukan.", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
