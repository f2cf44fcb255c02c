use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{exists_active, str_param};
use crate::ipc::types::{AppState, Request};
use crate::model::AgeGroup;
use crate::tags;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Include student counts so the UI can show a useful dashboard.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.age_group,
           c.teacher_id,
           t.name,
           (SELECT COUNT(*) FROM students s
            WHERE s.class_id = c.id AND s.is_deleted = 0) AS student_count
         FROM classes c
         JOIN teachers t ON t.id = c.teacher_id
         WHERE c.is_deleted = 0
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let age_group: String = row.get(2)?;
            let teacher_id: String = row.get(3)?;
            let teacher_name: String = row.get(4)?;
            let student_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "ageGroup": age_group,
                "teacherId": teacher_id,
                "teacherName": teacher_name,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(name) = str_param(&req.params, "name") else {
        return err(&req.id, "bad_params", "Nama kelas harus diisi.", None);
    };
    let Some(age_group_raw) = str_param(&req.params, "ageGroup") else {
        return err(&req.id, "bad_params", "Kelompok usia harus dipilih.", None);
    };
    let Some(age_group) = AgeGroup::parse(&age_group_raw) else {
        return err(&req.id, "bad_params", "Kelompok usia tidak valid.", None);
    };
    let Some(teacher_id) = str_param(&req.params, "teacherId") else {
        return err(&req.id, "bad_params", "Guru harus dipilih.", None);
    };

    let name_taken: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM classes WHERE name = ? AND is_deleted = 0",
            [&name],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if name_taken.is_some() {
        return err(&req.id, "duplicate", "Nama kelas sudah digunakan.", None);
    }

    match exists_active(conn, "teachers", &teacher_id) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_found",
                "Guru tidak ditemukan atau sudah tidak aktif.",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, age_group, teacher_id, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &class_id,
            &name,
            age_group.as_str(),
            &teacher_id,
            db::now_utc(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            "Terjadi kesalahan saat menambahkan data kelas.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state
        .tags
        .bump(&[tags::CLASSES, tags::TEACHERS, tags::STATS]);
    ok(&req.id, json!({ "classId": class_id }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };
    let Some(name) = str_param(&req.params, "name") else {
        return err(&req.id, "bad_params", "Nama kelas harus diisi.", None);
    };
    let Some(age_group_raw) = str_param(&req.params, "ageGroup") else {
        return err(&req.id, "bad_params", "Kelompok usia harus dipilih.", None);
    };
    let Some(age_group) = AgeGroup::parse(&age_group_raw) else {
        return err(&req.id, "bad_params", "Kelompok usia tidak valid.", None);
    };
    let Some(teacher_id) = str_param(&req.params, "teacherId") else {
        return err(&req.id, "bad_params", "Guru harus dipilih.", None);
    };

    match exists_active(conn, "classes", &id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "Kelas tidak ditemukan.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let name_taken: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM classes WHERE name = ? AND id <> ? AND is_deleted = 0",
            [&name, &id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if name_taken.is_some() {
        return err(&req.id, "duplicate", "Nama kelas sudah digunakan.", None);
    }

    match exists_active(conn, "teachers", &teacher_id) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_found",
                "Guru tidak ditemukan atau sudah tidak aktif.",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "UPDATE classes SET name = ?, age_group = ?, teacher_id = ?, updated_at = ?
         WHERE id = ?",
        (&name, age_group.as_str(), &teacher_id, db::now_utc(), &id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            "Terjadi kesalahan saat memperbarui data kelas.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state
        .tags
        .bump(&[tags::CLASSES, tags::TEACHERS, tags::STATS]);
    ok(&req.id, json!({ "classId": id }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    match exists_active(conn, "classes", &id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "Kelas tidak ditemukan.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // A class with active students cannot disappear out from under them;
    // pupils must be moved or removed first.
    let live_students: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM students WHERE class_id = ? AND is_deleted = 0",
        [&id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if live_students > 0 {
        return err(
            &req.id,
            "has_students",
            "Tidak dapat menghapus kelas yang masih memiliki siswa.",
            None,
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE classes SET is_deleted = 1, deleted_at = ? WHERE id = ?",
        (db::now_utc(), &id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            "Terjadi kesalahan saat menghapus data kelas.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state
        .tags
        .bump(&[tags::CLASSES, tags::TEACHERS, tags::STATS]);
    ok(&req.id, json!({ "classId": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
