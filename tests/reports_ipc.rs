use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
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

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn login(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &Path) {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        stdin,
        reader,
        "login",
        "auth.login",
        json!({ "email": "admin@example.com", "password": "admin123" }),
    );
}

#[test]
fn reports_reflect_registrations_and_zero_fill() {
    let workspace = temp_dir("comedor-reports-ipc");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    login(&mut stdin, &mut reader, &workspace);

    for (i, (ident, category)) in [("EST001", "paid"), ("EST002", "paid"), ("EST003", "becado")]
        .iter()
        .enumerate()
    {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({ "identifier": ident, "name": format!("Alumno {}", i), "class": "2° A", "feeCategory": category }),
        );
    }
    request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "attendance.register",
        json!({ "identifier": "EST001", "mealType": "lunch" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "attendance.register",
        json!({ "identifier": "EST002", "mealType": "lunch" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "attendance.register",
        json!({ "identifier": "EST001", "mealType": "breakfast" }),
    );

    let today = chrono::Local::now().date_naive();
    let today_text = today.format("%Y-%m-%d").to_string();

    let daily = request_ok(&mut stdin, &mut reader, "d", "reports.daily", json!({}));
    assert_eq!(daily["date"].as_str(), Some(today_text.as_str()));
    assert_eq!(daily["count"], 3);
    assert_eq!(daily["activeStudents"], 3);

    let weekly = request_ok(&mut stdin, &mut reader, "w", "reports.weekly", json!({}));
    let days = weekly["days"].as_array().expect("days");
    assert_eq!(days.len(), 7);
    assert_eq!(days[6]["date"].as_str(), Some(today_text.as_str()));
    assert_eq!(days[6]["count"], 3);
    assert!(days[..6].iter().all(|d| d["count"] == 0));

    let breakdown = request_ok(&mut stdin, &mut reader, "b", "reports.breakdown", json!({}));
    assert_eq!(breakdown["byCategory"]["paid"], 3);
    assert_eq!(breakdown["byCategory"]["subsidized"], 0);

    // A month with no attendance still reports both categories.
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "b2",
        "reports.breakdown",
        json!({ "month": 2, "year": 2001 }),
    );
    assert_eq!(empty["byCategory"]["paid"], 0);
    assert_eq!(empty["byCategory"]["subsidized"], 0);

    let bad_month = request(
        &mut stdin,
        &mut reader,
        "b3",
        "reports.breakdown",
        json!({ "month": 13, "year": 2024 }),
    );
    assert_eq!(error_code(&bad_month), "bad_params");

    let dashboard = request_ok(&mut stdin, &mut reader, "dash", "reports.dashboard", json!({}));
    assert_eq!(dashboard["todayCount"], 3);
    assert_eq!(dashboard["activeStudents"], 3);
    assert_eq!(dashboard["todayRate"], 100);
    assert_eq!(dashboard["week"].as_array().map(|a| a.len()), Some(7));
    assert!(dashboard["recent"].as_array().map(|a| a.len()).unwrap_or(0) <= 5);

    let totals = request_ok(
        &mut stdin,
        &mut reader,
        "t",
        "reports.studentTotals",
        json!({ "feeCategory": "paid" }),
    );
    assert_eq!(totals["rows"].as_array().map(|a| a.len()), Some(2));

    let history_csv = request_ok(&mut stdin, &mut reader, "csv1", "reports.exportHistoryCsv", json!({}));
    assert_eq!(history_csv["rowsExported"], 3);
    let path = PathBuf::from(history_csv["path"].as_str().expect("path"));
    assert!(path.starts_with(workspace.join("exports")));
    let text = std::fs::read_to_string(&path).expect("read history csv");
    assert!(text.starts_with('\u{feff}'));
    assert!(text.contains("EST001"));

    let out = workspace.join("totales.csv");
    let totals_csv = request_ok(
        &mut stdin,
        &mut reader,
        "csv2",
        "reports.exportTotalsCsv",
        json!({ "outPath": out.to_string_lossy() }),
    );
    assert_eq!(totals_csv["rowsExported"], 2);
    assert!(out.is_file());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn out_of_range_dates_do_not_take_the_daemon_down() {
    let workspace = temp_dir("comedor-reports-edges");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    login(&mut stdin, &mut reader, &workspace);

    for (i, (method, key)) in [("reports.weekly", "endDate"), ("menus.week", "date")]
        .iter()
        .enumerate()
    {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("edge{}", i),
            method,
            json!({ key.to_string(): "-262143-01-03" }),
        );
        if resp["ok"].as_bool() != Some(true) {
            assert_eq!(error_code(&resp), "bad_params", "{}", resp);
        }
    }

    let health = request_ok(&mut stdin, &mut reader, "after", "health", json!({}));
    assert_eq!(health["loggedIn"], true);

    let _ = std::fs::remove_dir_all(workspace);
}
