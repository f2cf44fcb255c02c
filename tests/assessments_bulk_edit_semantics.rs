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

fn find_assessment<'a>(
    assessments: &'a [serde_json::Value],
    indicator_id: &str,
) -> Option<&'a serde_json::Value> {
    assessments
        .iter()
        .find(|a| a["indicatorId"] == json!(indicator_id))
}

#[test]
fn edit_mode_updates_by_id_fills_gaps_and_leaves_the_rest_alone() {
    let workspace = temp_dir("sisd-bulk-edit");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "pre",
        "assessments.bulkSave",
        json!({
            "studentId": school.student_id,
            "semester": "SEMESTER_1",
            "academicYearId": school.year_id,
            "assessmentData": json!([
                { "indicatorId": school.indicator_ids[0], "development": "BAIK" },
                { "indicatorId": school.indicator_ids[1], "development": "CUKUP", "notes": "sudah lancar" }
            ]).to_string(),
            "isEditMode": "false"
        }),
    );

    let before = request_ok(
        &mut stdin,
        &mut reader,
        "before",
        "assessments.forStudent",
        json!({ "studentId": school.student_id }),
    );
    let before = before["assessments"].as_array().expect("assessments").clone();
    let first_id = find_assessment(&before, &school.indicator_ids[0]).expect("first")["id"]
        .as_str()
        .expect("id")
        .to_string();

    // Explicit id for indicator 0, no id for already-rated indicator 1,
    // no id for unrated indicator 2.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "assessments.bulkSave",
        json!({
            "studentId": school.student_id,
            "semester": "SEMESTER_1",
            "academicYearId": school.year_id,
            "assessmentData": json!([
                {
                    "indicatorId": school.indicator_ids[0],
                    "development": "PERLU_DILATIH",
                    "assessmentId": first_id
                },
                { "indicatorId": school.indicator_ids[1], "development": "BAIK" },
                { "indicatorId": school.indicator_ids[2], "development": "CUKUP" }
            ]).to_string(),
            "isEditMode": "true"
        }),
    );
    assert_eq!(result["updated"], 1);
    assert_eq!(result["created"], 1);
    assert_eq!(result["skipped"], 1);
    assert_eq!(
        result["message"],
        "Penilaian perkembangan berhasil diperbarui."
    );
    assert!(result["redirect"]
        .as_str()
        .expect("redirect")
        .contains("berhasil%20diperbarui."));

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "after",
        "assessments.forStudent",
        json!({ "studentId": school.student_id }),
    );
    let after = after["assessments"].as_array().expect("assessments").clone();
    assert_eq!(after.len(), 3);

    // The explicit-id row changed in place: same id, new level.
    let first = find_assessment(&after, &school.indicator_ids[0]).expect("first");
    assert_eq!(first["id"], json!(first_id));
    assert_eq!(first["development"], "PERLU_DILATIH");

    // The natural-key match without an id kept its old level and notes.
    let second = find_assessment(&after, &school.indicator_ids[1]).expect("second");
    assert_eq!(second["development"], "CUKUP");
    assert_eq!(second["notes"], "sudah lancar");

    let third = find_assessment(&after, &school.indicator_ids[2]).expect("third");
    assert_eq!(third["development"], "CUKUP");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn edit_mode_treats_a_stale_assessment_id_as_a_per_row_no_op() {
    let workspace = temp_dir("sisd-bulk-edit-stale-id");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "pre",
        "assessments.bulkSave",
        json!({
            "studentId": school.student_id,
            "semester": "SEMESTER_1",
            "academicYearId": school.year_id,
            "assessmentData": json!([
                { "indicatorId": school.indicator_ids[0], "development": "BAIK" }
            ]).to_string(),
            "isEditMode": "false"
        }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "assessments.bulkSave",
        json!({
            "studentId": school.student_id,
            "semester": "SEMESTER_1",
            "academicYearId": school.year_id,
            "assessmentData": json!([
                {
                    "indicatorId": school.indicator_ids[0],
                    "development": "CUKUP",
                    "assessmentId": "no-such-assessment"
                }
            ]).to_string(),
            "isEditMode": "true"
        }),
    );
    assert_eq!(result["updated"], 0);
    assert_eq!(result["created"], 0);
    assert_eq!(result["skipped"], 1);

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "after",
        "assessments.forStudent",
        json!({ "studentId": school.student_id }),
    );
    let after = after["assessments"].as_array().expect("assessments").clone();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0]["development"], "BAIK");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
