use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("sis.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            name TEXT NOT NULL,
            address TEXT,
            mobile TEXT,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    // Soft-deleted rows release the username for reuse.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_teachers_username
         ON teachers(username) WHERE is_deleted = 0",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            age_group TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_classes_name
         ON classes(name) WHERE is_deleted = 0",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            year TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_academic_years_year
         ON academic_years(year) WHERE is_deleted = 0",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            nis TEXT NOT NULL,
            name TEXT NOT NULL,
            gender TEXT,
            birth_place TEXT,
            birth_date TEXT,
            religion TEXT,
            address TEXT,
            father_name TEXT,
            mother_name TEXT,
            class_id TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    // The filtered index makes a deleted student's NIS reusable without
    // rewriting the deleted row's key.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_students_nis
         ON students(nis) WHERE is_deleted = 0",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS development_aspects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            description TEXT,
            sort_order INTEGER NOT NULL DEFAULT 1,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_development_aspects_code
         ON development_aspects(code) WHERE is_deleted = 0",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS development_indicators(
            id TEXT PRIMARY KEY,
            aspect_id TEXT NOT NULL,
            name TEXT NOT NULL,
            short_name TEXT,
            sort_order INTEGER NOT NULL DEFAULT 1,
            age_group TEXT,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(aspect_id) REFERENCES development_aspects(id)
        )",
        [],
    )?;
    ensure_indicators_age_group(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_development_indicators_aspect
         ON development_indicators(aspect_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS development_assessments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            indicator_id TEXT NOT NULL,
            semester TEXT NOT NULL,
            academic_year_id TEXT NOT NULL,
            development TEXT NOT NULL,
            notes TEXT,
            assessment_date TEXT,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(indicator_id) REFERENCES development_indicators(id),
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id)
        )",
        [],
    )?;
    ensure_assessments_assessment_date(&conn)?;
    // One non-deleted rating per student/indicator/semester/year. The index
    // is also the conflict target for the bulk insert-or-ignore path, which
    // closes the check-then-act window between concurrent batches.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_development_assessments_natural
         ON development_assessments(student_id, indicator_id, semester, academic_year_id)
         WHERE is_deleted = 0",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_development_assessments_student
         ON development_assessments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_development_assessments_indicator
         ON development_assessments(indicator_id)",
        [],
    )?;

    Ok(conn)
}

/// RFC 3339 UTC timestamp used for created/updated/deleted-at columns.
pub fn now_utc() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn ensure_indicators_age_group(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces predate the per-indicator age-group restriction.
    if table_has_column(conn, "development_indicators", "age_group")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE development_indicators ADD COLUMN age_group TEXT",
        [],
    )?;
    Ok(())
}

fn ensure_assessments_assessment_date(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "development_assessments", "assessment_date")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE development_assessments ADD COLUMN assessment_date TEXT",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
