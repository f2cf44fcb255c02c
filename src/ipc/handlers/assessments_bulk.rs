//! Bulk development-assessment reconciliation.
//!
//! One call carries a whole scoring sheet for a single student, scoped to a
//! semester and academic year. Creation mode inserts only the indicators
//! that have no live rating yet; edit mode patches rows named by id and
//! fills in missing ones, never touching an existing row it was not told
//! about.

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{flag_param, percent_encode, str_param};
use crate::ipc::types::{AppState, Request};
use crate::model::{DevelopmentLevel, Semester};
use crate::tags;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const FORMAT_MSG: &str = "Format data penilaian tidak valid.";
const NOTHING_TO_ADD_MSG: &str =
    "Tidak ada penilaian baru untuk ditambahkan. Semua indikator sudah dinilai untuk semester ini.";
const SAVE_FAILED_MSG: &str = "Terjadi kesalahan saat menambahkan penilaian perkembangan.";
const UPDATE_FAILED_MSG: &str = "Terjadi kesalahan saat memperbarui penilaian perkembangan.";

struct BulkItem {
    indicator_id: String,
    development: DevelopmentLevel,
    notes: Option<String>,
    assessment_date: Option<String>,
    assessment_id: Option<String>,
}

/// Decodes the serialized item array. Rows with no indicator or no
/// development level are "not yet rated" placeholders from the form grid and
/// are dropped, not rejected. An unknown development label is a malformed
/// payload.
fn parse_items(raw: &str) -> Result<Vec<BulkItem>, &'static str> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw).map_err(|_| FORMAT_MSG)?;

    let mut items = Vec::with_capacity(values.len());
    for value in &values {
        let indicator_id = value
            .get("indicatorId")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let development_raw = value
            .get("development")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let (Some(indicator_id), Some(development_raw)) = (indicator_id, development_raw) else {
            continue;
        };
        let development = DevelopmentLevel::parse(development_raw).ok_or(FORMAT_MSG)?;

        items.push(BulkItem {
            indicator_id: indicator_id.to_string(),
            development,
            notes: value
                .get("notes")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            assessment_date: value
                .get("assessmentDate")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            assessment_id: value
                .get("assessmentId")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        });
    }
    Ok(items)
}

fn has_live_rating(
    conn: &Connection,
    student_id: &str,
    indicator_id: &str,
    semester: &str,
    academic_year_id: &str,
) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM development_assessments
             WHERE student_id = ? AND indicator_id = ? AND semester = ?
               AND academic_year_id = ? AND is_deleted = 0",
            [student_id, indicator_id, semester, academic_year_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Insert keyed on the natural-key index; a concurrent batch that already
/// created the row makes this a no-op instead of a constraint failure.
fn insert_or_ignore(
    conn: &Connection,
    student_id: &str,
    semester: &str,
    academic_year_id: &str,
    item: &BulkItem,
    now: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO development_assessments(
           id, student_id, indicator_id, semester, academic_year_id,
           development, notes, assessment_date, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, indicator_id, semester, academic_year_id)
           WHERE is_deleted = 0
         DO NOTHING",
        (
            Uuid::new_v4().to_string(),
            student_id,
            &item.indicator_id,
            semester,
            academic_year_id,
            item.development.as_str(),
            item.notes.as_deref(),
            item.assessment_date.as_deref(),
            now,
        ),
    )
}

fn handle_bulk_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let is_edit_mode = flag_param(&req.params, "isEditMode");

    // Required-field checks run before any lookup or write.
    let Some(student_id) = str_param(&req.params, "studentId") else {
        return err(&req.id, "bad_params", "Siswa harus dipilih.", None);
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
    let Some(raw_data) = str_param(&req.params, "assessmentData") else {
        return err(&req.id, "bad_params", "Data penilaian harus diisi.", None);
    };

    let items = match parse_items(&raw_data) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let student_class: Option<String> = match conn
        .query_row(
            "SELECT class_id FROM students WHERE id = ? AND is_deleted = 0",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(student_class) = student_class else {
        return err(
            &req.id,
            "not_found",
            "Siswa tidak ditemukan atau sudah tidak aktif.",
            None,
        );
    };

    if is_edit_mode {
        let year_exists: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM academic_years WHERE id = ? AND is_deleted = 0",
                [&academic_year_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if year_exists.is_none() {
            return err(&req.id, "not_found", "Tahun ajaran tidak ditemukan.", None);
        }
    }

    let now = db::now_utc();
    let mut created = 0usize;
    let mut updated = 0usize;
    let mut skipped = 0usize;

    if is_edit_mode {
        // Rows are applied independently; an id that matches nothing live is
        // a per-row no-op, and a row with no id only ever fills a gap.
        for item in &items {
            if let Some(assessment_id) = &item.assessment_id {
                let changed = conn.execute(
                    "UPDATE development_assessments SET
                       development = ?, notes = ?, assessment_date = ?,
                       semester = ?, academic_year_id = ?, updated_at = ?
                     WHERE id = ? AND is_deleted = 0",
                    (
                        item.development.as_str(),
                        item.notes.as_deref(),
                        item.assessment_date.as_deref(),
                        semester.as_str(),
                        &academic_year_id,
                        &now,
                        assessment_id,
                    ),
                );
                match changed {
                    Ok(0) => skipped += 1,
                    Ok(_) => updated += 1,
                    Err(e) => {
                        return err(
                            &req.id,
                            "db_update_failed",
                            UPDATE_FAILED_MSG,
                            Some(json!({ "cause": e.to_string() })),
                        )
                    }
                }
            } else {
                match insert_or_ignore(
                    conn,
                    &student_id,
                    semester.as_str(),
                    &academic_year_id,
                    item,
                    &now,
                ) {
                    Ok(0) => skipped += 1,
                    Ok(_) => created += 1,
                    Err(e) => {
                        return err(
                            &req.id,
                            "db_insert_failed",
                            UPDATE_FAILED_MSG,
                            Some(json!({ "cause": e.to_string() })),
                        )
                    }
                }
            }
        }
    } else {
        let mut staged: Vec<&BulkItem> = Vec::with_capacity(items.len());
        for item in &items {
            match has_live_rating(
                conn,
                &student_id,
                &item.indicator_id,
                semester.as_str(),
                &academic_year_id,
            ) {
                Ok(true) => skipped += 1,
                Ok(false) => staged.push(item),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }

        // A resubmission with nothing new is surfaced to the UI, not
        // silently accepted.
        if staged.is_empty() {
            return err(&req.id, "nothing_to_add", NOTHING_TO_ADD_MSG, None);
        }

        let tx = match conn.unchecked_transaction() {
            Ok(t) => t,
            Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
        };
        for item in &staged {
            match insert_or_ignore(
                &tx,
                &student_id,
                semester.as_str(),
                &academic_year_id,
                item,
                &now,
            ) {
                Ok(0) => skipped += 1,
                Ok(_) => created += 1,
                Err(e) => {
                    let _ = tx.rollback();
                    return err(
                        &req.id,
                        "db_insert_failed",
                        SAVE_FAILED_MSG,
                        Some(json!({ "cause": e.to_string() })),
                    );
                }
            }
        }
        if let Err(e) = tx.commit() {
            return err(&req.id, "db_tx_failed", e.to_string(), None);
        }
    }

    state.tags.bump(&[
        tags::STUDENTS,
        tags::STUDENT,
        tags::ASSESSMENT,
        tags::ASSESSMENTS,
        tags::STUDENT_ASSESSMENTS,
        tags::STATS,
    ]);

    let message = if is_edit_mode {
        "Penilaian perkembangan berhasil diperbarui."
    } else {
        "Penilaian perkembangan berhasil ditambahkan."
    };
    // classId only shapes the redirect target; the student's own class is
    // the fallback when the form did not carry one.
    let class_id = str_param(&req.params, "classId").unwrap_or(student_class);
    let redirect = format!(
        "/assessments/{}?semester={}&year={}&success=1&message={}",
        class_id,
        semester.as_str(),
        academic_year_id,
        percent_encode(message)
    );

    ok(
        &req.id,
        json!({
            "created": created,
            "updated": updated,
            "skipped": skipped,
            "redirect": redirect,
            "message": message
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assessments.bulkSave" => Some(handle_bulk_save(state, req)),
        _ => None,
    }
}
