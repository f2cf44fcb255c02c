use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{exists_active, str_param};
use crate::ipc::types::{AppState, Request};
use crate::model::AgeGroup;
use crate::tags;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct IndicatorInput {
    id: Option<String>,
    name: String,
    short_name: Option<String>,
    sort_order: i64,
    age_group: Option<String>,
}

/// Parses `params.indicators`, rejecting rows with an empty name. The error
/// names the 1-based row the way the original form did.
fn parse_indicators(params: &serde_json::Value) -> Result<Vec<IndicatorInput>, String> {
    let Some(items) = params.get("indicators").and_then(|v| v.as_array()) else {
        return Err("Minimal satu indikator harus diisi.".to_string());
    };
    if items.is_empty() {
        return Err("Minimal satu indikator harus diisi.".to_string());
    }

    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let name = item
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("");
        if name.is_empty() {
            return Err(format!("Nama indikator {} harus diisi.", i + 1));
        }
        let age_group = item
            .get("ageGroup")
            .and_then(|v| v.as_str())
            .and_then(AgeGroup::parse)
            .map(|g| g.as_str().to_string());
        out.push(IndicatorInput {
            id: item
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            name: name.to_string(),
            short_name: item
                .get("shortName")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            sort_order: item
                .get("order")
                .and_then(|v| v.as_i64())
                .unwrap_or(i as i64 + 1),
            age_group,
        });
    }
    Ok(out)
}

fn code_taken(conn: &Connection, code: &str, exclude_id: Option<&str>) -> rusqlite::Result<bool> {
    let found: Option<i64> = match exclude_id {
        Some(id) => conn
            .query_row(
                "SELECT 1 FROM development_aspects
                 WHERE code = ? AND id <> ? AND is_deleted = 0",
                [code, id],
                |r| r.get(0),
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT 1 FROM development_aspects WHERE code = ? AND is_deleted = 0",
                [code],
                |r| r.get(0),
            )
            .optional()?,
    };
    Ok(found.is_some())
}

fn handle_aspects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(name) = str_param(&req.params, "name") else {
        return err(
            &req.id,
            "bad_params",
            "Nama aspek perkembangan harus diisi.",
            None,
        );
    };
    let Some(code) = str_param(&req.params, "code") else {
        return err(
            &req.id,
            "bad_params",
            "Kode aspek perkembangan harus diisi.",
            None,
        );
    };
    let code = code.to_uppercase();
    let description = str_param(&req.params, "description");
    let sort_order = req.params.get("order").and_then(|v| v.as_i64()).unwrap_or(1);

    match code_taken(conn, &code, None) {
        Ok(true) => {
            return err(
                &req.id,
                "duplicate",
                "Kode aspek perkembangan sudah digunakan.",
                None,
            )
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let indicators = match parse_indicators(&req.params) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let aspect_id = Uuid::new_v4().to_string();
    let now = db::now_utc();
    if let Err(e) = tx.execute(
        "INSERT INTO development_aspects(id, name, code, description, sort_order, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &aspect_id,
            &name,
            &code,
            description.as_deref(),
            sort_order,
            &now,
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            "Terjadi kesalahan saat menambahkan aspek perkembangan.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    for ind in &indicators {
        if let Err(e) = tx.execute(
            "INSERT INTO development_indicators(
               id, aspect_id, name, short_name, sort_order, age_group, created_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &aspect_id,
                &ind.name,
                ind.short_name.as_deref(),
                ind.sort_order,
                ind.age_group.as_deref(),
                &now,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                "Terjadi kesalahan saat menambahkan aspek perkembangan.",
                Some(json!({ "cause": e.to_string() })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    state
        .tags
        .bump(&[tags::ASPECTS, tags::STUDENT, tags::STATS]);
    ok(&req.id, json!({ "aspectId": aspect_id }))
}

fn handle_aspects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };
    let Some(name) = str_param(&req.params, "name") else {
        return err(
            &req.id,
            "bad_params",
            "Nama aspek perkembangan harus diisi.",
            None,
        );
    };
    let Some(code) = str_param(&req.params, "code") else {
        return err(
            &req.id,
            "bad_params",
            "Kode aspek perkembangan harus diisi.",
            None,
        );
    };
    let code = code.to_uppercase();
    let description = str_param(&req.params, "description");
    let sort_order = req.params.get("order").and_then(|v| v.as_i64()).unwrap_or(1);

    match exists_active(conn, "development_aspects", &id) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_found",
                "Aspek perkembangan tidak ditemukan.",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match code_taken(conn, &code, Some(&id)) {
        Ok(true) => {
            return err(
                &req.id,
                "duplicate",
                "Kode aspek perkembangan sudah digunakan.",
                None,
            )
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let indicators = match parse_indicators(&req.params) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let deleted_ids: Vec<String> = req
        .params
        .get("deletedIndicatorIds")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let now = db::now_utc();
    if let Err(e) = tx.execute(
        "UPDATE development_aspects
         SET name = ?, code = ?, description = ?, sort_order = ?, updated_at = ?
         WHERE id = ?",
        (&name, &code, description.as_deref(), sort_order, &now, &id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            "Terjadi kesalahan saat memperbarui aspek perkembangan.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    for ind in &indicators {
        let result = match &ind.id {
            // Existing indicator: patch in place.
            Some(ind_id) => tx.execute(
                "UPDATE development_indicators
                 SET name = ?, short_name = ?, sort_order = ?, age_group = ?, updated_at = ?
                 WHERE id = ? AND aspect_id = ? AND is_deleted = 0",
                (
                    &ind.name,
                    ind.short_name.as_deref(),
                    ind.sort_order,
                    ind.age_group.as_deref(),
                    &now,
                    ind_id,
                    &id,
                ),
            ),
            None => tx.execute(
                "INSERT INTO development_indicators(
                   id, aspect_id, name, short_name, sort_order, age_group, created_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &id,
                    &ind.name,
                    ind.short_name.as_deref(),
                    ind.sort_order,
                    ind.age_group.as_deref(),
                    &now,
                ),
            ),
        };
        if let Err(e) = result {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                "Terjadi kesalahan saat memperbarui aspek perkembangan.",
                Some(json!({ "cause": e.to_string() })),
            );
        }
    }

    for ind_id in &deleted_ids {
        if let Err(e) = tx.execute(
            "UPDATE development_indicators SET is_deleted = 1, deleted_at = ?
             WHERE id = ? AND aspect_id = ?",
            (&now, ind_id, &id),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                "Terjadi kesalahan saat memperbarui aspek perkembangan.",
                Some(json!({ "cause": e.to_string() })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    state
        .tags
        .bump(&[tags::ASPECTS, tags::STUDENT, tags::STATS]);
    ok(&req.id, json!({ "aspectId": id }))
}

fn handle_aspects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    match exists_active(conn, "development_aspects", &id) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_found",
                "Aspek perkembangan tidak ditemukan.",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let now = db::now_utc();
    // Indicators go with their aspect.
    if let Err(e) = tx
        .execute(
            "UPDATE development_aspects SET is_deleted = 1, deleted_at = ? WHERE id = ?",
            (&now, &id),
        )
        .and_then(|_| {
            tx.execute(
                "UPDATE development_indicators SET is_deleted = 1, deleted_at = ?
                 WHERE aspect_id = ? AND is_deleted = 0",
                (&now, &id),
            )
        })
    {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            "Terjadi kesalahan saat menghapus aspek perkembangan.",
            Some(json!({ "cause": e.to_string() })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    state
        .tags
        .bump(&[tags::ASPECTS, tags::STUDENT, tags::STATS]);
    ok(&req.id, json!({ "aspectId": id }))
}

fn aspect_json(conn: &Connection, aspect_id: &str) -> rusqlite::Result<Option<serde_json::Value>> {
    let aspect = conn
        .query_row(
            "SELECT id, name, code, description, sort_order
             FROM development_aspects
             WHERE id = ? AND is_deleted = 0",
            [aspect_id],
            |row| {
                let id: String = row.get(0)?;
                let name: String = row.get(1)?;
                let code: String = row.get(2)?;
                let description: Option<String> = row.get(3)?;
                let sort_order: i64 = row.get(4)?;
                Ok(json!({
                    "id": id,
                    "name": name,
                    "code": code,
                    "description": description,
                    "order": sort_order
                }))
            },
        )
        .optional()?;

    let Some(mut aspect) = aspect else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT id, name, short_name, sort_order, age_group
         FROM development_indicators
         WHERE aspect_id = ? AND is_deleted = 0
         ORDER BY sort_order",
    )?;
    let indicators = stmt
        .query_map([aspect_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let short_name: Option<String> = row.get(2)?;
            let sort_order: i64 = row.get(3)?;
            let age_group: Option<String> = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "shortName": short_name,
                "order": sort_order,
                "ageGroup": age_group
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    aspect["indicators"] = json!(indicators);
    Ok(Some(aspect))
}

fn handle_aspects_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = str_param(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    match aspect_json(conn, &id) {
        Ok(Some(aspect)) => ok(&req.id, json!({ "aspect": aspect })),
        Ok(None) => err(
            &req.id,
            "not_found",
            "Aspek perkembangan tidak ditemukan.",
            None,
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_aspects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "aspects": [] }));
    };

    let ids: Result<Vec<String>, _> = conn
        .prepare(
            "SELECT id FROM development_aspects
             WHERE is_deleted = 0
             ORDER BY sort_order",
        )
        .and_then(|mut stmt| {
            stmt.query_map([], |row| row.get::<_, String>(0))
                .and_then(|it| it.collect())
        });
    let ids = match ids {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut aspects = Vec::with_capacity(ids.len());
    for id in &ids {
        match aspect_json(conn, id) {
            Ok(Some(aspect)) => aspects.push(aspect),
            Ok(None) => {}
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    ok(&req.id, json!({ "aspects": aspects }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "aspects.list" => Some(handle_aspects_list(state, req)),
        "aspects.get" => Some(handle_aspects_get(state, req)),
        "aspects.createWithIndicators" => Some(handle_aspects_create(state, req)),
        "aspects.updateWithIndicators" => Some(handle_aspects_update(state, req)),
        "aspects.delete" => Some(handle_aspects_delete(state, req)),
        _ => None,
    }
}
