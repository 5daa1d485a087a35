use crate::error::CafeteriaError;
use serde_json::json;
use tracing::error;

use super::types::Request;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn domain_err(id: &str, e: &CafeteriaError) -> serde_json::Value {
    if let CafeteriaError::Storage(inner) = e {
        error!(request = id, error = %inner, "storage failure");
    }
    err(id, e.code(), e.to_string(), e.details())
}

/// Handlers build `Result<result, error response>` and finish here.
pub fn respond(req: &Request, r: Result<serde_json::Value, serde_json::Value>) -> serde_json::Value {
    match r {
        Ok(result) => ok(&req.id, result),
        Err(resp) => resp,
    }
}

pub trait OrResponse<T> {
    fn or_resp(self, req: &Request) -> Result<T, serde_json::Value>;
}

impl<T> OrResponse<T> for Result<T, CafeteriaError> {
    fn or_resp(self, req: &Request) -> Result<T, serde_json::Value> {
        self.map_err(|e| domain_err(&req.id, &e))
    }
}
