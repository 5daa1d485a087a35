use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use serde::Serialize;
use std::fmt;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
}

impl MealType {
    pub fn as_str(self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
        }
    }

    /// Accepts the English names and the Spanish names older clients send.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "breakfast" | "desayuno" => Some(MealType::Breakfast),
            "lunch" | "almuerzo" => Some(MealType::Lunch),
            "dinner" | "cena" => Some(MealType::Dinner),
            _ => None,
        }
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeCategory {
    Subsidized,
    Paid,
}

impl FeeCategory {
    pub const ALL: [FeeCategory; 2] = [FeeCategory::Subsidized, FeeCategory::Paid];

    pub fn as_str(self) -> &'static str {
        match self {
            FeeCategory::Subsidized => "subsidized",
            FeeCategory::Paid => "paid",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "subsidized" | "becado" => Some(FeeCategory::Subsidized),
            "paid" | "pagado" => Some(FeeCategory::Paid),
            _ => None,
        }
    }
}

impl fmt::Display for FeeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationMethod {
    Manual,
    Qr,
    Card,
}

impl RegistrationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RegistrationMethod::Manual => "manual",
            RegistrationMethod::Qr => "qr",
            RegistrationMethod::Card => "card",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "manual" => Some(RegistrationMethod::Manual),
            "qr" => Some(RegistrationMethod::Qr),
            "card" | "tarjeta" => Some(RegistrationMethod::Card),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
    Monitor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::Monitor => "monitor",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "staff" | "personal" => Some(Role::Staff),
            "monitor" => Some(Role::Monitor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub identifier: String,
    pub name: String,
    pub class_name: String,
    pub fee_category: FeeCategory,
    pub active: bool,
    pub registered_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: i64,
    #[serde(serialize_with = "ser_timestamp")]
    pub recorded_at: NaiveDateTime,
    #[serde(serialize_with = "ser_date")]
    pub service_date: NaiveDate,
    pub meal_type: MealType,
    pub method: RegistrationMethod,
    pub recorded_by: i64,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuEntry {
    pub id: i64,
    #[serde(serialize_with = "ser_date")]
    pub date: NaiveDate,
    pub main_dish: String,
    pub side: Option<String>,
    pub dessert: Option<String>,
    pub calories: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
}

pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

pub(crate) fn ser_date<S: serde::Serializer>(d: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_date(*d))
}

fn ser_timestamp<S: serde::Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_timestamp(*ts))
}

/// Reads a TEXT column and maps it through `parse`, surfacing unknown values
/// as a conversion failure instead of silently defaulting.
pub fn text_col<T>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value {:?}", raw).into(),
        )
    })
}

pub fn date_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    text_col(row, idx, parse_date)
}

pub fn timestamp_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    text_col(row, idx, |s| {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok()
    })
}
