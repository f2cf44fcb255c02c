use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{exists_active, i64_param, sort_clause, str_param};
use crate::ipc::types::{AppState, Request};
use crate::model::{DevelopmentLevel, Semester};
use crate::tags;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub const DUPLICATE_MSG: &str = "Penilaian untuk siswa dan indikator ini sudah ada.";

/// True when a live assessment already occupies the natural key.
pub fn natural_key_occupied(
    conn: &Connection,
    student_id: &str,
    indicator_id: &str,
    semester: &str,
    academic_year_id: &str,
    exclude_id: Option<&str>,
) -> rusqlite::Result<bool> {
    let found: Option<i64> = match exclude_id {
        Some(id) => conn
            .query_row(
                "SELECT 1 FROM development_assessments
                 WHERE student_id = ? AND indicator_id = ? AND semester = ?
                   AND academic_year_id = ? AND id <> ? AND is_deleted = 0",
                [student_id, indicator_id, semester, academic_year_id, id],
                |r| r.get(0),
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT 1 FROM development_assessments
                 WHERE student_id = ? AND indicator_id = ? AND semester = ?
                   AND academic_year_id = ? AND is_deleted = 0",
                [student_id, indicator_id, semester, academic_year_id],
                |r| r.get(0),
            )
            .optional()?,
    };
    Ok(found.is_some())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
    )
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(student_id) = str_param(&req.params, "studentId") else {
        return err(&req.id, "bad_params", "Siswa harus dipilih.", None);
    };
    let Some(indicator_id) = str_param(&req.params, "indicatorId") else {
        return err(
            &req.id,
            "bad_params",
            "Indikator perkembangan harus dipilih.",
            None,
        );
    };
    let Some(development_raw) = str_param(&req.params, "development") else {
        return err(
            &req.id,
            "bad_params",
            "Tingkat perkembangan harus dipilih.",
            None,
        );
    };
    let Some(development) = DevelopmentLevel::parse(&development_raw) else {
        return err(
            &req.id,
            "bad_params",
            "Tingkat perkembangan tidak valid.",
            None,
        );
    };
    let Some(semester_raw) = str_param(&req.params, "semester") else {
        return err(&req.id, "bad_params", "Semester harus dipilih.", None);
    };
    let Some(semester) = Semester::parse(&semester_raw) else {
        return err(&req.id, "bad_params", "Semester tidak valid.", None);
    };
    let Some(academic_year_id) = str_param(&req.params, "academicYearId") else {
        return err(&req.id, "bad_params", "Tahun ajaran harus diisi.", None);
    };
    let notes = str_param(&req.params, "notes");
    let assessment_date = str_param(&req.params, "assessmentDate");

    match exists_active(conn, "students", &student_id) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_found",
                "Siswa tidak ditemukan atau sudah tidak aktif.",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match exists_active(conn, "development_indicators", &indicator_id) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_found",
                "Indikator perkembangan tidak ditemukan atau sudah tidak aktif.",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match exists_active(conn, "academic_years", &academic_year_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "Tahun ajaran tidak ditemukan.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match natural_key_occupied(
        conn,
        &student_id,
        &indicator_id,
        semester.as_str(),
        &academic_year_id,
        None,
    ) {
        Ok(true) => return err(&req.id, "duplicate", DUPLICATE_MSG, None),
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let assessment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO development_assessments(
           id, student_id, indicator_id, semester, academic_year_id,
           development, notes, assessment_date, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &assessment_id,
            &student_id,
            &indicator_id,
            semester.as_str(),
            &academic_year_id,
            development.as_str(),
            notes.as_deref(),
            assessment_date.as_deref(),
            db::now_utc(),
        ),
    ) {
        // The unique index is the backstop for a concurrent create racing
        // past the pre-check.
        if is_constraint_violation(&e) {
            return err(&req.id, "duplicate", DUPLICATE_MSG, None);
        }
        return err(
            &req.id,
            "db_insert_failed",
            "Terjadi kesalahan saat menambahkan penilaian perkembangan.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state.tags.bump(&[
        tags::ASSESSMENT,
        tags::ASSESSMENTS,
        tags::STUDENT_ASSESSMENTS,
        tags::STATS,
    ]);
    ok(&req.id, json!({ "assessmentId": assessment_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };
    let Some(development_raw) = str_param(&req.params, "development") else {
        return err(
            &req.id,
            "bad_params",
            "Tingkat perkembangan harus dipilih.",
            None,
        );
    };
    let Some(development) = DevelopmentLevel::parse(&development_raw) else {
        return err(
            &req.id,
            "bad_params",
            "Tingkat perkembangan tidak valid.",
            None,
        );
    };

    let existing = conn
        .query_row(
            "SELECT student_id, indicator_id, semester, academic_year_id
             FROM development_assessments
             WHERE id = ? AND is_deleted = 0",
            [&id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional();
    let (cur_student, cur_indicator, cur_semester, cur_year) = match existing {
        Ok(Some(v)) => v,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "Penilaian perkembangan tidak ditemukan.",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Key fields may be re-pointed; anything omitted keeps its current value.
    let student_id = str_param(&req.params, "studentId").unwrap_or(cur_student.clone());
    let indicator_id = str_param(&req.params, "indicatorId").unwrap_or(cur_indicator.clone());
    let semester = match str_param(&req.params, "semester") {
        Some(raw) => match Semester::parse(&raw) {
            Some(s) => s.as_str().to_string(),
            None => return err(&req.id, "bad_params", "Semester tidak valid.", None),
        },
        None => cur_semester.clone(),
    };
    let academic_year_id = str_param(&req.params, "academicYearId").unwrap_or(cur_year.clone());
    let notes = str_param(&req.params, "notes");
    let assessment_date = str_param(&req.params, "assessmentDate");

    if student_id != cur_student {
        match exists_active(conn, "students", &student_id) {
            Ok(true) => {}
            Ok(false) => {
                return err(
                    &req.id,
                    "not_found",
                    "Siswa tidak ditemukan atau sudah tidak aktif.",
                    None,
                )
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    if indicator_id != cur_indicator {
        match exists_active(conn, "development_indicators", &indicator_id) {
            Ok(true) => {}
            Ok(false) => {
                return err(
                    &req.id,
                    "not_found",
                    "Indikator perkembangan tidak ditemukan atau sudah tidak aktif.",
                    None,
                )
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    if academic_year_id != cur_year {
        match exists_active(conn, "academic_years", &academic_year_id) {
            Ok(true) => {}
            Ok(false) => {
                return err(&req.id, "not_found", "Tahun ajaran tidak ditemukan.", None)
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let rekeyed = student_id != cur_student
        || indicator_id != cur_indicator
        || semester != cur_semester
        || academic_year_id != cur_year;
    if rekeyed {
        match natural_key_occupied(
            conn,
            &student_id,
            &indicator_id,
            &semester,
            &academic_year_id,
            Some(&id),
        ) {
            Ok(true) => return err(&req.id, "duplicate", DUPLICATE_MSG, None),
            Ok(false) => {}
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    if let Err(e) = conn.execute(
        "UPDATE development_assessments SET
           student_id = ?, indicator_id = ?, semester = ?, academic_year_id = ?,
           development = ?, notes = ?, assessment_date = ?, updated_at = ?
         WHERE id = ?",
        (
            &student_id,
            &indicator_id,
            &semester,
            &academic_year_id,
            development.as_str(),
            notes.as_deref(),
            assessment_date.as_deref(),
            db::now_utc(),
            &id,
        ),
    ) {
        if is_constraint_violation(&e) {
            return err(&req.id, "duplicate", DUPLICATE_MSG, None);
        }
        return err(
            &req.id,
            "db_update_failed",
            "Terjadi kesalahan saat memperbarui penilaian perkembangan.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state.tags.bump(&[
        tags::ASSESSMENT,
        tags::ASSESSMENTS,
        tags::STUDENT_ASSESSMENTS,
        tags::STATS,
    ]);
    ok(&req.id, json!({ "assessmentId": id }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    match exists_active(conn, "development_assessments", &id) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_found",
                "Penilaian perkembangan tidak ditemukan.",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "UPDATE development_assessments SET is_deleted = 1, deleted_at = ? WHERE id = ?",
        (db::now_utc(), &id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            "Terjadi kesalahan saat menghapus penilaian perkembangan.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    state.tags.bump(&[
        tags::ASSESSMENT,
        tags::ASSESSMENTS,
        tags::STUDENT_ASSESSMENTS,
        tags::STATS,
    ]);
    ok(&req.id, json!({ "assessmentId": id }))
}

fn assessment_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let student_id: String = row.get(1)?;
    let student_name: String = row.get(2)?;
    let student_nis: String = row.get(3)?;
    let indicator_id: String = row.get(4)?;
    let indicator_name: String = row.get(5)?;
    let aspect_id: String = row.get(6)?;
    let aspect_name: String = row.get(7)?;
    let aspect_code: String = row.get(8)?;
    let semester: String = row.get(9)?;
    let academic_year_id: String = row.get(10)?;
    let year: String = row.get(11)?;
    let development: String = row.get(12)?;
    let notes: Option<String> = row.get(13)?;
    let assessment_date: Option<String> = row.get(14)?;
    Ok(json!({
        "id": id,
        "studentId": student_id,
        "studentName": student_name,
        "studentNis": student_nis,
        "indicatorId": indicator_id,
        "indicatorName": indicator_name,
        "aspectId": aspect_id,
        "aspectName": aspect_name,
        "aspectCode": aspect_code,
        "semester": semester,
        "academicYearId": academic_year_id,
        "academicYear": year,
        "development": development,
        "notes": notes,
        "assessmentDate": assessment_date
    }))
}

const ASSESSMENT_SELECT: &str = "SELECT da.id, s.id, s.name, s.nis,
       i.id, i.name, a.id, a.name, a.code,
       da.semester, da.academic_year_id, y.year,
       da.development, da.notes, da.assessment_date
  FROM development_assessments da
  JOIN students s ON s.id = da.student_id
  JOIN development_indicators i ON i.id = da.indicator_id
  JOIN development_aspects a ON a.id = i.aspect_id
  JOIN academic_years y ON y.id = da.academic_year_id";

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(
            &req.id,
            json!({ "assessments": [], "totalCount": 0, "currentPage": 1, "totalPages": 0 }),
        );
    };

    let mut where_sql = String::from("da.is_deleted = 0");
    let mut binds: Vec<SqlValue> = Vec::new();

    if let Some(search) = str_param(&req.params, "search") {
        where_sql
            .push_str(" AND (s.name LIKE ? OR s.nis LIKE ? OR i.name LIKE ? OR da.notes LIKE ?)");
        let pattern = format!("%{}%", search);
        for _ in 0..4 {
            binds.push(SqlValue::Text(pattern.clone()));
        }
    }
    if let Some(student_id) = str_param(&req.params, "studentId") {
        where_sql.push_str(" AND da.student_id = ?");
        binds.push(SqlValue::Text(student_id));
    }
    if let Some(indicator_id) = str_param(&req.params, "indicatorId") {
        where_sql.push_str(" AND da.indicator_id = ?");
        binds.push(SqlValue::Text(indicator_id));
    }
    if let Some(semester) = str_param(&req.params, "semester") {
        where_sql.push_str(" AND da.semester = ?");
        binds.push(SqlValue::Text(semester));
    }
    if let Some(year_id) = str_param(&req.params, "academicYearId") {
        where_sql.push_str(" AND da.academic_year_id = ?");
        binds.push(SqlValue::Text(year_id));
    }

    let total_count: i64 = match conn.query_row(
        &format!(
            "SELECT COUNT(*)
             FROM development_assessments da
             JOIN students s ON s.id = da.student_id
             JOIN development_indicators i ON i.id = da.indicator_id
             WHERE {}",
            where_sql
        ),
        params_from_iter(binds.iter()),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let order = sort_clause(
        &req.params,
        &[
            ("createdAt", "da.created_at"),
            ("assessmentDate", "da.assessment_date"),
            ("development", "da.development"),
            ("studentName", "s.name"),
        ],
        "da.created_at",
    );
    let skip = i64_param(&req.params, "skip", 0).max(0);
    let limit = i64_param(&req.params, "limit", 20).clamp(1, 200);

    let sql = format!(
        "{} WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
        ASSESSMENT_SELECT, where_sql, order
    );
    binds.push(SqlValue::Integer(limit));
    binds.push(SqlValue::Integer(skip));

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds.iter()), |row| {
            assessment_row_json(row)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(assessments) => ok(
            &req.id,
            json!({
                "assessments": assessments,
                "totalCount": total_count,
                "currentPage": skip / limit + 1,
                "totalPages": (total_count + limit - 1) / limit,
                "itemsPerPage": limit
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let sql = format!("{} WHERE da.id = ? AND da.is_deleted = 0", ASSESSMENT_SELECT);
    let row = conn
        .query_row(&sql, [&id], |row| assessment_row_json(row))
        .optional();

    match row {
        Ok(Some(assessment)) => ok(&req.id, json!({ "assessment": assessment })),
        Ok(None) => err(
            &req.id,
            "not_found",
            "Penilaian perkembangan tidak ditemukan.",
            None,
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = str_param(&req.params, "studentId") else {
        return err(&req.id, "bad_params", "Siswa harus dipilih.", None);
    };

    let mut where_sql =
        String::from("da.student_id = ? AND da.is_deleted = 0");
    let mut binds: Vec<SqlValue> = vec![SqlValue::Text(student_id)];
    if let Some(semester) = str_param(&req.params, "semester") {
        where_sql.push_str(" AND da.semester = ?");
        binds.push(SqlValue::Text(semester));
    }
    if let Some(year_id) = str_param(&req.params, "academicYearId") {
        where_sql.push_str(" AND da.academic_year_id = ?");
        binds.push(SqlValue::Text(year_id));
    }

    // Report-card order: aspect display order, then indicator order.
    let sql = format!(
        "{} WHERE {} ORDER BY a.sort_order, i.sort_order",
        ASSESSMENT_SELECT, where_sql
    );

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds.iter()), |row| {
            assessment_row_json(row)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(assessments) => ok(&req.id, json!({ "assessments": assessments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assessments.list" => Some(handle_list(state, req)),
        "assessments.get" => Some(handle_get(state, req)),
        "assessments.forStudent" => Some(handle_for_student(state, req)),
        "assessments.create" => Some(handle_create(state, req)),
        "assessments.update" => Some(handle_update(state, req)),
        "assessments.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
