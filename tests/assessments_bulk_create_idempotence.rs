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
fn bulk_create_inserts_once_and_rejects_identical_resubmission() {
    let workspace = temp_dir("sisd-bulk-idempotence");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader, &workspace);

    let batch = json!([
        { "indicatorId": school.indicator_ids[0], "development": "BAIK" },
        { "indicatorId": school.indicator_ids[1], "development": "CUKUP" }
    ])
    .to_string();

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "assessments.bulkSave",
        json!({
            "studentId": school.student_id,
            "semester": "SEMESTER_1",
            "academicYearId": school.year_id,
            "classId": school.class_id,
            "assessmentData": batch,
            "isEditMode": "false"
        }),
    );
    assert_eq!(first["created"], 2);
    assert_eq!(first["updated"], 0);
    assert_eq!(
        first["redirect"].as_str().expect("redirect"),
        format!(
            "/assessments/{}?semester=SEMESTER_1&year={}&success=1&message=Penilaian%20perkembangan%20berhasil%20ditambahkan.",
            school.class_id, school.year_id
        )
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assessments.forStudent",
        json!({ "studentId": school.student_id }),
    );
    let assessments = listed["assessments"].as_array().expect("assessments");
    assert_eq!(assessments.len(), 2);
    assert_eq!(assessments[0]["development"], "BAIK");
    assert_eq!(assessments[1]["development"], "CUKUP");

    // Same sheet again: nothing new, surfaced as an error, zero writes.
    let second = request(
        &mut stdin,
        &mut reader,
        "3",
        "assessments.bulkSave",
        json!({
            "studentId": school.student_id,
            "semester": "SEMESTER_1",
            "academicYearId": school.year_id,
            "classId": school.class_id,
            "assessmentData": json!([
                { "indicatorId": school.indicator_ids[0], "development": "BAIK" },
                { "indicatorId": school.indicator_ids[1], "development": "CUKUP" }
            ]).to_string(),
            "isEditMode": "false"
        }),
    );
    assert_eq!(second["ok"], false);
    assert_eq!(second["error"]["code"], "nothing_to_add");
    assert_eq!(
        second["error"]["message"],
        "Tidak ada penilaian baru untuk ditambahkan. Semua indikator sudah dinilai untuk semester ini."
    );

    let relisted = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "assessments.forStudent",
        json!({ "studentId": school.student_id }),
    );
    assert_eq!(relisted["assessments"].as_array().expect("assessments").len(), 2);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn same_indicator_in_other_semester_is_a_new_rating() {
    let workspace = temp_dir("sisd-bulk-semester-scope");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader, &workspace);

    for (n, semester) in ["SEMESTER_1", "SEMESTER_2"].iter().enumerate() {
        let result = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", n),
            "assessments.bulkSave",
            json!({
                "studentId": school.student_id,
                "semester": semester,
                "academicYearId": school.year_id,
                "assessmentData": json!([
                    { "indicatorId": school.indicator_ids[0], "development": "BAIK" }
                ]).to_string(),
                "isEditMode": "false"
            }),
        );
        assert_eq!(result["created"], 1, "semester {}", semester);
    }

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "check",
        "assessments.forStudent",
        json!({ "studentId": school.student_id }),
    );
    assert_eq!(listed["assessments"].as_array().expect("assessments").len(), 2);

    let first_only = request_ok(
        &mut stdin,
        &mut reader,
        "check-s1",
        "assessments.forStudent",
        json!({ "studentId": school.student_id, "semester": "SEMESTER_1" }),
    );
    assert_eq!(
        first_only["assessments"].as_array().expect("assessments").len(),
        1
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
