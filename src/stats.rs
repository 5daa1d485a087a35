//! Read-only aggregation over the attendance ledger.

use crate::directory;
use crate::error::{CafeteriaError, Result};
use crate::ledger::{self, HistoryFilter, HistoryRow};
use crate::menus;
use crate::model::{date_col, format_date, text_col, FeeCategory, MenuEntry};
use chrono::{Datelike, Days, NaiveDate};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const WEEK_DAYS: i64 = 7;
const RECENT_LIMIT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayCount {
    #[serde(serialize_with = "crate::model::ser_date")]
    pub date: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRow {
    pub class_name: String,
    pub total: i64,
    pub subsidized: i64,
    pub paid: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBreakdown {
    pub month: u32,
    pub year: i32,
    pub by_category: BTreeMap<FeeCategory, i64>,
    pub by_class: Vec<ClassRow>,
}

/// Rounded percentage; zero when there is nothing to divide by.
pub fn attendance_rate(count: i64, denominator: i64) -> i64 {
    if denominator <= 0 {
        return 0;
    }
    (count as f64 / denominator as f64 * 100.0).round() as i64
}

pub fn daily_count(conn: &Connection, date: NaiveDate) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM attendance WHERE service_date = ?",
        [format_date(date)],
        |r| r.get(0),
    )?)
}

/// One entry per day in `from..=to`, ascending, days without records as 0.
pub fn daily_series(conn: &Connection, from: NaiveDate, to: NaiveDate) -> Result<Vec<DayCount>> {
    let mut stmt = conn.prepare(
        "SELECT service_date, COUNT(*)
         FROM attendance
         WHERE service_date >= ? AND service_date <= ?
         GROUP BY service_date",
    )?;
    let counts: HashMap<NaiveDate, i64> = stmt
        .query_map([format_date(from), format_date(to)], |r| {
            Ok((date_col(r, 0)?, r.get(1)?))
        })?
        .collect::<rusqlite::Result<_>>()?;

    Ok(from
        .iter_days()
        .take_while(|d| *d <= to)
        .map(|date| DayCount {
            date,
            count: counts.get(&date).copied().unwrap_or(0),
        })
        .collect())
}

pub fn weekly_series(conn: &Connection, end: NaiveDate) -> Result<Vec<DayCount>> {
    let start = end
        .checked_sub_days(Days::new(WEEK_DAYS as u64 - 1))
        .ok_or_else(|| CafeteriaError::validation("endDate", "date out of range"))?;
    daily_series(conn, start, end)
}

fn month_bounds(month: u32, year: i32) -> Result<(NaiveDate, NaiveDate)> {
    if !(1..=12).contains(&month) {
        return Err(CafeteriaError::validation(
            "month",
            "month must be between 1 and 12",
        ));
    }
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| CafeteriaError::validation("year", "year out of range"))?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| CafeteriaError::validation("year", "year out of range"))?;
    let last = next
        .pred_opt()
        .ok_or_else(|| CafeteriaError::validation("year", "year out of range"))?;
    Ok((first, last))
}

/// Counts per fee category for the inclusive range. Both categories are
/// always present.
pub fn category_counts(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<BTreeMap<FeeCategory, i64>> {
    let mut out: BTreeMap<FeeCategory, i64> =
        FeeCategory::ALL.iter().map(|c| (*c, 0)).collect();
    let mut stmt = conn.prepare(
        "SELECT s.fee_category, COUNT(a.id)
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE a.service_date >= ? AND a.service_date <= ?
         GROUP BY s.fee_category",
    )?;
    let rows = stmt.query_map([format_date(from), format_date(to)], |r| {
        Ok((text_col(r, 0, FeeCategory::parse)?, r.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (cat, n) = row?;
        *out.entry(cat).or_insert(0) += n;
    }
    Ok(out)
}

fn class_rows(conn: &Connection, from: NaiveDate, to: NaiveDate) -> Result<Vec<ClassRow>> {
    let mut stmt = conn.prepare(
        "SELECT s.class_name,
                COUNT(a.id),
                SUM(CASE WHEN s.fee_category = 'subsidized' THEN 1 ELSE 0 END),
                SUM(CASE WHEN s.fee_category = 'paid' THEN 1 ELSE 0 END)
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE a.service_date >= ? AND a.service_date <= ?
         GROUP BY s.class_name
         ORDER BY s.class_name",
    )?;
    let rows = stmt
        .query_map([format_date(from), format_date(to)], |r| {
            Ok(ClassRow {
                class_name: r.get(0)?,
                total: r.get(1)?,
                subsidized: r.get(2)?,
                paid: r.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn breakdown_by_category(
    conn: &Connection,
    month: u32,
    year: i32,
) -> Result<CategoryBreakdown> {
    let (from, to) = month_bounds(month, year)?;
    Ok(CategoryBreakdown {
        month,
        year,
        by_category: category_counts(conn, from, to)?,
        by_class: class_rows(conn, from, to)?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
    pub total: i64,
    #[serde(flatten)]
    pub breakdown: CategoryBreakdown,
    /// Only days with activity, ascending.
    pub per_day: Vec<DayCount>,
}

pub fn monthly_summary(conn: &Connection, month: u32, year: i32) -> Result<MonthlySummary> {
    let breakdown = breakdown_by_category(conn, month, year)?;
    let (from, to) = month_bounds(month, year)?;
    let per_day: Vec<DayCount> = daily_series(conn, from, to)?
        .into_iter()
        .filter(|d| d.count > 0)
        .collect();
    Ok(MonthlySummary {
        total: breakdown.by_category.values().sum(),
        breakdown,
        per_day,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentTotal {
    pub student_id: i64,
    pub identifier: String,
    pub name: String,
    pub class_name: String,
    pub fee_category: FeeCategory,
    pub total: i64,
}

/// Per-student totals for students with at least one record in range.
pub fn student_totals(
    conn: &Connection,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    category: Option<FeeCategory>,
) -> Result<Vec<StudentTotal>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut bind: Vec<Value> = Vec::new();
    if let Some(from) = from {
        clauses.push("a.service_date >= ?");
        bind.push(Value::Text(format_date(from)));
    }
    if let Some(to) = to {
        clauses.push("a.service_date <= ?");
        bind.push(Value::Text(format_date(to)));
    }
    if let Some(cat) = category {
        clauses.push("s.fee_category = ?");
        bind.push(Value::Text(cat.as_str().to_string()));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT s.id, s.identifier, s.name, s.class_name, s.fee_category, COUNT(a.id)
         FROM students s
         JOIN attendance a ON a.student_id = s.id
         {}
         GROUP BY s.id
         ORDER BY s.name, s.id",
        where_sql
    ))?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok(StudentTotal {
                student_id: r.get(0)?,
                identifier: r.get(1)?,
                name: r.get(2)?,
                class_name: r.get(3)?,
                fee_category: text_col(r, 4, FeeCategory::parse)?,
                total: r.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    #[serde(serialize_with = "crate::model::ser_date")]
    pub today: NaiveDate,
    pub total_students: i64,
    pub active_students: i64,
    pub subsidized_students: i64,
    pub paid_students: i64,
    pub today_count: i64,
    pub today_rate: i64,
    pub week: Vec<DayCount>,
    pub week_by_category: BTreeMap<FeeCategory, i64>,
    pub upcoming_menus: i64,
    pub today_menu: Option<MenuEntry>,
    pub recent: Vec<HistoryRow>,
}

pub fn dashboard(conn: &Connection, today: NaiveDate) -> Result<Dashboard> {
    let (total_students, subsidized_students, paid_students): (i64, i64, i64) = conn
        .query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN fee_category = 'subsidized' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN fee_category = 'paid' THEN 1 ELSE 0 END), 0)
             FROM students",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
    let active_students = directory::count_active(conn)?;
    let today_count = daily_count(conn, today)?;
    let week = weekly_series(conn, today)?;
    let week_start = week.first().map(|d| d.date).unwrap_or(today);

    Ok(Dashboard {
        today,
        total_students,
        active_students,
        subsidized_students,
        paid_students,
        today_count,
        today_rate: attendance_rate(today_count, active_students),
        week_by_category: category_counts(conn, week_start, today)?,
        week,
        upcoming_menus: menus::count_from(conn, today)?,
        today_menu: menus::for_date(conn, today)?,
        recent: ledger::history(
            conn,
            &HistoryFilter {
                limit: Some(RECENT_LIMIT),
                ..HistoryFilter::default()
            },
        )?,
    })
}

/// Current (month, year) for a day; used as the default report period.
pub fn month_of(day: NaiveDate) -> (u32, i32) {
    (day.month(), day.year())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::open_temp;
    use crate::ledger::register_attendance;
    use crate::ledger::tests::{add_student, reg, ts};
    use crate::model::MealType;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[test]
    fn rate_guards_zero_denominator_and_rounds() {
        assert_eq!(attendance_rate(5, 0), 0);
        assert_eq!(attendance_rate(0, 10), 0);
        assert_eq!(attendance_rate(1, 3), 33);
        assert_eq!(attendance_rate(2, 3), 67);
        assert_eq!(attendance_rate(3, 3), 100);
    }

    #[test]
    fn weekly_series_zero_fills_around_a_single_busy_day() {
        let (workspace, conn) = open_temp("comedor-stats-week");
        for id in ["EST001", "EST002", "EST003"] {
            add_student(&conn, id, "3°", FeeCategory::Paid);
            register_attendance(&conn, &reg(id, MealType::Lunch), ts(2024, 5, 3, 12, 0))
                .expect("register");
        }
        // Outside the window on both sides.
        register_attendance(&conn, &reg("EST001", MealType::Lunch), ts(2024, 4, 28, 12, 0))
            .expect("before");
        register_attendance(&conn, &reg("EST001", MealType::Lunch), ts(2024, 5, 6, 12, 0))
            .expect("after");

        let week = weekly_series(&conn, ymd(2024, 5, 5)).expect("series");
        let got: Vec<(String, i64)> = week
            .iter()
            .map(|d| (d.date.format("%m-%d").to_string(), d.count))
            .collect();
        let expected: Vec<(String, i64)> = [
            ("04-29", 0),
            ("04-30", 0),
            ("05-01", 0),
            ("05-02", 0),
            ("05-03", 3),
            ("05-04", 0),
            ("05-05", 0),
        ]
        .iter()
        .map(|(d, n)| (d.to_string(), *n))
        .collect();
        assert_eq!(got, expected);
        assert_eq!(daily_count(&conn, ymd(2024, 5, 3)).expect("daily"), 3);
        assert_eq!(daily_count(&conn, ymd(2024, 5, 4)).expect("daily"), 0);
        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn weekly_series_on_empty_ledger_is_seven_zeros() {
        let (workspace, conn) = open_temp("comedor-stats-empty");
        let week = weekly_series(&conn, ymd(2024, 3, 2)).expect("series");
        assert_eq!(week.len(), 7);
        assert_eq!(week[0].date, ymd(2024, 2, 25));
        assert_eq!(week[6].date, ymd(2024, 3, 2));
        assert!(week.iter().all(|d| d.count == 0));
        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn day_counts_serialize_with_plain_dates() {
        let day = DayCount {
            date: ymd(2024, 5, 3),
            count: 3,
        };
        assert_eq!(
            serde_json::to_value(day).expect("serialize"),
            serde_json::json!({ "date": "2024-05-03", "count": 3 })
        );
    }

    #[test]
    fn weekly_series_rejects_window_before_earliest_date() {
        let (workspace, conn) = open_temp("comedor-stats-min");
        assert!(matches!(
            weekly_series(&conn, NaiveDate::MIN),
            Err(CafeteriaError::Validation { field: "endDate", .. })
        ));
        let earliest_full = NaiveDate::MIN
            .checked_add_days(Days::new(6))
            .expect("min + 6");
        let week = weekly_series(&conn, earliest_full).expect("series");
        assert_eq!(week.first().map(|d| d.date), Some(NaiveDate::MIN));
        assert_eq!(week.len(), 7);
        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn breakdown_keeps_absent_categories_at_zero() {
        let (workspace, conn) = open_temp("comedor-stats-breakdown");
        add_student(&conn, "P1", "4°", FeeCategory::Paid);
        add_student(&conn, "P2", "3°", FeeCategory::Paid);
        add_student(&conn, "S1", "3°", FeeCategory::Subsidized);
        register_attendance(&conn, &reg("P1", MealType::Lunch), ts(2024, 5, 3, 12, 0))
            .expect("p1");
        register_attendance(&conn, &reg("P2", MealType::Lunch), ts(2024, 5, 3, 12, 0))
            .expect("p2");
        register_attendance(&conn, &reg("P2", MealType::Dinner), ts(2024, 5, 31, 19, 0))
            .expect("p2 dinner");
        // Subsidized student only eats in June.
        register_attendance(&conn, &reg("S1", MealType::Lunch), ts(2024, 6, 1, 12, 0))
            .expect("s1");

        let may = breakdown_by_category(&conn, 5, 2024).expect("may");
        assert_eq!(may.by_category.get(&FeeCategory::Subsidized), Some(&0));
        assert_eq!(may.by_category.get(&FeeCategory::Paid), Some(&3));
        assert_eq!(
            may.by_class,
            vec![
                ClassRow {
                    class_name: "3°".to_string(),
                    total: 2,
                    subsidized: 0,
                    paid: 2
                },
                ClassRow {
                    class_name: "4°".to_string(),
                    total: 1,
                    subsidized: 0,
                    paid: 1
                },
            ]
        );
        let json = serde_json::to_value(&may).expect("json");
        assert_eq!(json["byCategory"]["subsidized"], 0);

        let june = monthly_summary(&conn, 6, 2024).expect("june");
        assert_eq!(june.total, 1);
        assert_eq!(june.per_day, vec![DayCount { date: ymd(2024, 6, 1), count: 1 }]);

        assert!(matches!(
            breakdown_by_category(&conn, 13, 2024),
            Err(CafeteriaError::Validation { .. })
        ));
        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn student_totals_filter_by_range_and_category() {
        let (workspace, conn) = open_temp("comedor-stats-totals");
        add_student(&conn, "P1", "4°", FeeCategory::Paid);
        add_student(&conn, "S1", "3°", FeeCategory::Subsidized);
        for (id, meal) in [
            ("P1", MealType::Breakfast),
            ("P1", MealType::Lunch),
            ("S1", MealType::Lunch),
        ] {
            register_attendance(&conn, &reg(id, meal), ts(2024, 5, 3, 12, 0)).expect("register");
        }
        register_attendance(&conn, &reg("S1", MealType::Lunch), ts(2024, 5, 10, 12, 0))
            .expect("later");

        let all = student_totals(&conn, None, None, None).expect("all");
        assert_eq!(
            all.iter().map(|t| (t.identifier.as_str(), t.total)).collect::<Vec<_>>(),
            vec![("P1", 2), ("S1", 2)]
        );
        let early_subsidized = student_totals(
            &conn,
            Some(ymd(2024, 5, 1)),
            Some(ymd(2024, 5, 5)),
            Some(FeeCategory::Subsidized),
        )
        .expect("filtered");
        assert_eq!(early_subsidized.len(), 1);
        assert_eq!(early_subsidized[0].total, 1);
        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn dashboard_combines_counts_rate_and_recent() {
        let (workspace, conn) = open_temp("comedor-stats-dashboard");
        add_student(&conn, "P1", "4°", FeeCategory::Paid);
        add_student(&conn, "P2", "4°", FeeCategory::Paid);
        add_student(&conn, "S1", "3°", FeeCategory::Subsidized);
        register_attendance(&conn, &reg("S1", MealType::Lunch), ts(2024, 5, 3, 12, 0))
            .expect("register");

        let d = dashboard(&conn, ymd(2024, 5, 3)).expect("dashboard");
        assert_eq!(d.total_students, 3);
        assert_eq!(d.active_students, 3);
        assert_eq!(d.subsidized_students, 1);
        assert_eq!(d.paid_students, 2);
        assert_eq!(d.today_count, 1);
        assert_eq!(d.today_rate, 33);
        assert_eq!(d.week.len(), 7);
        assert_eq!(d.week_by_category.get(&FeeCategory::Paid), Some(&0));
        assert_eq!(d.recent.len(), 1);
        assert!(d.today_menu.is_none());
        let _ = std::fs::remove_dir_all(workspace);
    }
}
