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
    let exe = env!("CARGO_BIN_EXE_comedord");
    let mut child = Command::new(exe)
        .env_remove("COMEDOR_WORKSPACE")
        .env("COMEDOR_ADMIN_PASSWORD", "admin123")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn comedord");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
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

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn result_of<'a>(value: &'a serde_json::Value, method: &str) -> &'a serde_json::Value {
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").expect("result")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("comedor-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");
    let history_csv = workspace.join("smoke-history.csv");
    let totals_csv = workspace.join("smoke-totals.csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(result_of(&health, "health")["loggedIn"], false);
    request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request(
        &mut stdin,
        &mut reader,
        "3",
        "auth.login",
        json!({ "email": "admin@example.com", "password": "admin123" }),
    );
    request(&mut stdin, &mut reader, "4", "auth.whoami", json!({}));
    request(&mut stdin, &mut reader, "5", "users.list", json!({}));
    let staff = request(
        &mut stdin,
        &mut reader,
        "6",
        "users.create",
        json!({ "name": "Cocina", "email": "cocina@example.com", "role": "staff", "password": "pw" }),
    );
    let staff_id = result_of(&staff, "users.create")["user"]["id"].clone();
    request(
        &mut stdin,
        &mut reader,
        "7",
        "users.update",
        json!({ "userId": staff_id, "name": "Cocina Central", "email": "cocina@example.com", "role": "staff", "active": true }),
    );

    let created = request(
        &mut stdin,
        &mut reader,
        "8",
        "students.create",
        json!({ "name": "Smoke Student", "class": "1° A", "feeCategory": "paid" }),
    );
    let student = result_of(&created, "students.create")["student"].clone();
    let identifier = student["identifier"].as_str().expect("generated identifier").to_string();
    assert!(identifier.starts_with("EST"));
    let student_id = student["id"].clone();

    request(&mut stdin, &mut reader, "9", "students.list", json!({}));
    request(&mut stdin, &mut reader, "10", "students.get", json!({ "studentId": student_id }));
    request(
        &mut stdin,
        &mut reader,
        "11",
        "students.update",
        json!({ "studentId": student_id, "name": "Smoke Student", "class": "1° B", "feeCategory": "subsidized" }),
    );
    request(
        &mut stdin,
        &mut reader,
        "12",
        "students.search",
        json!({ "criteria": "identifier", "text": identifier }),
    );
    request(&mut stdin, &mut reader, "13", "students.qrPayload", json!({ "identifier": identifier }));

    request(
        &mut stdin,
        &mut reader,
        "14",
        "attendance.register",
        json!({ "identifier": identifier, "mealType": "lunch" }),
    );
    request(&mut stdin, &mut reader, "15", "attendance.history", json!({}));
    request(&mut stdin, &mut reader, "16", "attendance.recent", json!({ "limit": 5 }));

    let menu = request(
        &mut stdin,
        &mut reader,
        "17",
        "menus.create",
        json!({ "date": "2024-05-03", "mainDish": "Arroz con pollo", "calories": 650 }),
    );
    let menu_id = result_of(&menu, "menus.create")["menu"]["id"].clone();
    request(&mut stdin, &mut reader, "18", "menus.list", json!({}));
    request(&mut stdin, &mut reader, "19", "menus.get", json!({ "menuId": menu_id }));
    request(
        &mut stdin,
        &mut reader,
        "20",
        "menus.update",
        json!({ "menuId": menu_id, "date": "2024-05-03", "mainDish": "Lentejas" }),
    );
    request(&mut stdin, &mut reader, "21", "menus.week", json!({ "date": "2024-05-01" }));
    request(&mut stdin, &mut reader, "22", "menus.today", json!({}));
    request(&mut stdin, &mut reader, "23", "menus.delete", json!({ "menuId": menu_id }));

    request(&mut stdin, &mut reader, "24", "reports.dashboard", json!({}));
    request(&mut stdin, &mut reader, "25", "reports.daily", json!({}));
    request(&mut stdin, &mut reader, "26", "reports.weekly", json!({}));
    request(&mut stdin, &mut reader, "27", "reports.breakdown", json!({}));
    request(&mut stdin, &mut reader, "28", "reports.monthly", json!({}));
    request(&mut stdin, &mut reader, "29", "reports.studentTotals", json!({}));
    request(
        &mut stdin,
        &mut reader,
        "30",
        "reports.exportHistoryCsv",
        json!({ "outPath": history_csv.to_string_lossy() }),
    );
    request(
        &mut stdin,
        &mut reader,
        "31",
        "reports.exportTotalsCsv",
        json!({ "outPath": totals_csv.to_string_lossy() }),
    );

    request(&mut stdin, &mut reader, "32", "settings.list", json!({}));
    request(
        &mut stdin,
        &mut reader,
        "33",
        "settings.set",
        json!({ "values": { "nombre_escuela": "Escuela Smoke" } }),
    );
    request(&mut stdin, &mut reader, "34", "hours.get", json!({}));
    request(
        &mut stdin,
        &mut reader,
        "35",
        "hours.set",
        json!({ "start": "11:30", "end": "14:00", "days": "1,2,3,4,5" }),
    );

    request(
        &mut stdin,
        &mut reader,
        "36",
        "backup.export",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    request(
        &mut stdin,
        &mut reader,
        "37",
        "backup.import",
        json!({ "inPath": bundle_out.to_string_lossy() }),
    );
    request(&mut stdin, &mut reader, "38", "auth.logout", json!({}));

    let unknown = request_raw(&mut stdin, &mut reader, "39", "classes.list");
    assert_eq!(unknown["error"]["code"], "not_implemented");

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let bad = read_response(&mut reader);
    assert_eq!(bad["ok"], false);
    assert_eq!(bad["error"]["code"], "bad_json");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

fn request_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
) -> serde_json::Value {
    writeln!(stdin, "{}", json!({ "id": id, "method": method, "params": {} }))
        .expect("write request");
    stdin.flush().expect("flush request");
    read_response(reader)
}
