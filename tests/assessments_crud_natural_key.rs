use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_sisd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sisd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct School {
    class_id: String,
    year_id: String,
    student_id: String,
    indicator_ids: Vec<String>,
}

fn seed_school(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> School {
    let _ = request_ok(
        stdin,
        reader,
        "seed-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = request_ok(
        stdin,
        reader,
        "seed-2",
        "teachers.create",
        json!({ "username": "bu.rina", "name": "Rina" }),
    );
    let class = request_ok(
        stdin,
        reader,
        "seed-3",
        "classes.create",
        json!({
            "name": "Kelas A",
            "ageGroup": "GROUP_A",
            "teacherId": teacher["teacherId"]
        }),
    );
    let year = request_ok(
        stdin,
        reader,
        "seed-4",
        "academicYears.create",
        json!({ "year": "2024/2025" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "seed-5",
        "aspects.createWithIndicators",
        json!({
            "name": "Nilai Agama dan Moral",
            "code": "NAM",
            "indicators": [
                { "name": "Berdoa sebelum dan sesudah kegiatan" },
                { "name": "Mengucap dan menjawab salam" },
                { "name": "Menghargai teman" }
            ]
        }),
    );
    let aspects = request_ok(stdin, reader, "seed-6", "aspects.list", json!({}));
    let indicator_ids: Vec<String> = aspects["aspects"][0]["indicators"]
        .as_array()
        .expect("indicators")
        .iter()
        .map(|i| i["id"].as_str().expect("indicator id").to_string())
        .collect();
    let student = request_ok(
        stdin,
        reader,
        "seed-7",
        "students.create",
        json!({ "nis": "2024001", "name": "Aisyah", "classId": class["classId"] }),
    );
    School {
        class_id: class["classId"].as_str().expect("class id").to_string(),
        year_id: year["academicYearId"]
            .as_str()
            .expect("year id")
            .to_string(),
        student_id: student["studentId"]
            .as_str()
            .expect("student id")
            .to_string(),
        indicator_ids,
    }
}

#[test]
fn natural_key_blocks_duplicates_until_the_slot_is_freed() {
    let workspace = temp_dir("sisd-natural-key");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "assessments.create",
        json!({
            "studentId": school.student_id,
            "indicatorId": school.indicator_ids[0],
            "semester": "SEMESTER_1",
            "academicYearId": school.year_id,
            "development": "BAIK"
        }),
    );
    let assessment_id = created["assessmentId"].as_str().expect("id").to_string();

    // Same student, indicator, semester and year: rejected.
    let duplicate = request(
        &mut stdin,
        &mut reader,
        "2",
        "assessments.create",
        json!({
            "studentId": school.student_id,
            "indicatorId": school.indicator_ids[0],
            "semester": "SEMESTER_1",
            "academicYearId": school.year_id,
            "development": "CUKUP"
        }),
    );
    assert_eq!(duplicate["ok"], false);
    assert_eq!(duplicate["error"]["code"], "duplicate");
    assert_eq!(
        duplicate["error"]["message"],
        "Penilaian untuk siswa dan indikator ini sudah ada."
    );

    // The other semester is a different slot.
    let other_semester = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assessments.create",
        json!({
            "studentId": school.student_id,
            "indicatorId": school.indicator_ids[0],
            "semester": "SEMESTER_2",
            "academicYearId": school.year_id,
            "development": "PERLU_DILATIH"
        }),
    );
    let other_id = other_semester["assessmentId"].as_str().expect("id").to_string();

    // Re-pointing the second row onto the occupied key is rejected too.
    let rekeyed = request(
        &mut stdin,
        &mut reader,
        "4",
        "assessments.update",
        json!({
            "id": other_id,
            "semester": "SEMESTER_1",
            "development": "BAIK"
        }),
    );
    assert_eq!(rekeyed["ok"], false);
    assert_eq!(rekeyed["error"]["code"], "duplicate");

    // Soft-deleting the occupant frees the slot for a fresh create.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assessments.delete",
        json!({ "id": assessment_id }),
    );
    let recreated = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assessments.create",
        json!({
            "studentId": school.student_id,
            "indicatorId": school.indicator_ids[0],
            "semester": "SEMESTER_1",
            "academicYearId": school.year_id,
            "development": "CUKUP"
        }),
    );
    assert!(recreated["assessmentId"].is_string());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn update_keeps_unmentioned_key_fields_and_checks_references() {
    let workspace = temp_dir("sisd-assessment-update");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "assessments.create",
        json!({
            "studentId": school.student_id,
            "indicatorId": school.indicator_ids[0],
            "semester": "SEMESTER_1",
            "academicYearId": school.year_id,
            "development": "CUKUP"
        }),
    );
    let assessment_id = created["assessmentId"].as_str().expect("id").to_string();

    // Only the level changes; the key stays where it was.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assessments.update",
        json!({ "id": assessment_id, "development": "BAIK", "notes": "mulai mandiri" }),
    );
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assessments.get",
        json!({ "id": assessment_id }),
    );
    assert_eq!(fetched["assessment"]["development"], "BAIK");
    assert_eq!(fetched["assessment"]["notes"], "mulai mandiri");
    assert_eq!(fetched["assessment"]["semester"], "SEMESTER_1");

    let bad_ref = request(
        &mut stdin,
        &mut reader,
        "4",
        "assessments.update",
        json!({
            "id": assessment_id,
            "development": "BAIK",
            "academicYearId": "no-such-year"
        }),
    );
    assert_eq!(bad_ref["ok"], false);
    assert_eq!(bad_ref["error"]["message"], "Tahun ajaran tidak ditemukan.");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
