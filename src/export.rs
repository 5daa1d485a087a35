use crate::ledger::HistoryRow;
use crate::model::format_date;
use crate::stats::StudentTotal;
use anyhow::Context;
use std::path::Path;

/// Spreadsheet apps detect UTF-8 from the byte order mark.
const UTF8_BOM: &str = "\u{feff}";

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn push_line(out: &mut String, fields: &[&str]) {
    let line: Vec<String> = fields.iter().map(|f| csv_quote(f)).collect();
    out.push_str(&line.join(","));
    out.push_str("\r\n");
}

pub fn history_csv(rows: &[HistoryRow]) -> String {
    let mut out = String::from(UTF8_BOM);
    push_line(
        &mut out,
        &[
            "name",
            "identifier",
            "class",
            "fee_category",
            "date",
            "time",
            "meal_type",
            "method",
        ],
    );
    for r in rows {
        let date = format_date(r.record.service_date);
        let time = r.record.recorded_at.format("%H:%M:%S").to_string();
        push_line(
            &mut out,
            &[
                &r.student_name,
                &r.student_identifier,
                &r.class_name,
                r.fee_category.as_str(),
                &date,
                &time,
                r.record.meal_type.as_str(),
                r.record.method.as_str(),
            ],
        );
    }
    out
}

pub fn totals_csv(rows: &[StudentTotal]) -> String {
    let mut out = String::from(UTF8_BOM);
    push_line(
        &mut out,
        &["name", "identifier", "class", "fee_category", "total"],
    );
    for r in rows {
        let total = r.total.to_string();
        push_line(
            &mut out,
            &[
                &r.name,
                &r.identifier,
                &r.class_name,
                r.fee_category.as_str(),
                &total,
            ],
        );
    }
    out
}

pub fn write_file(out_path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }
    std::fs::write(out_path, contents)
        .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))
}

/// Default export file name, e.g. `asistencias_2024-05-03.csv`.
pub fn default_file_name(prefix: &str, today: chrono::NaiveDate) -> String {
    format!("{}_{}.csv", prefix, today.format("%Y-%m-%d"))
}
