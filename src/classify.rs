//! Response classification for REST calls
//!
//! Every REST exchange funnels through [`classify`], which turns a
//! completed HTTP status + body into a tagged outcome the caller can
//! pattern-match on. Unknown status/body combinations are surfaced as
//! [`Classified::Unclassified`] rather than coerced into a known failure,
//! so protocol drift stays visible.

use reqwest::StatusCode;
use serde_json::Value;

use crate::error::DataSiftError;

/// Outcome of classifying an HTTP exchange
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// 2xx with a decoded payload (Null for 204)
    Success(Value),
    /// 401 with an error body
    AuthFailure(String),
    /// Any status with a structured `error` body
    ApiFailure { status: u16, message: String },
    /// Body was not decodable as JSON
    ServerFailure { status: u16, detail: String },
    /// Non-2xx without an error body - surfaced, never absorbed
    Unclassified { status: u16, body: String },
}

/// Classify a completed HTTP exchange.
///
/// Mirrors the service's error reporting convention: failures carry a
/// JSON body with an `error` field. A response whose body does not decode
/// is a server-side failure regardless of status; a decodable non-error
/// body on a non-2xx status is unrecognized and passed through.
pub fn classify(status: StatusCode, body: &str) -> Classified {
    if status == StatusCode::NO_CONTENT {
        return Classified::Success(Value::Null);
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            return Classified::ServerFailure {
                status: status.as_u16(),
                detail: format!("Unable to decode returned data: {}", e),
            }
        }
    };

    if let Some(error) = value.get("error") {
        let message = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());

        if status == StatusCode::UNAUTHORIZED {
            return Classified::AuthFailure(message);
        }
        return Classified::ApiFailure {
            status: status.as_u16(),
            message,
        };
    }

    if !status.is_success() {
        return Classified::Unclassified {
            status: status.as_u16(),
            body: body.to_string(),
        };
    }

    Classified::Success(value)
}

impl Classified {
    /// Convert into a `Result`, mapping each failure to its error kind
    pub fn into_result(self) -> Result<Value, DataSiftError> {
        match self {
            Classified::Success(value) => Ok(value),
            Classified::AuthFailure(message) => Err(DataSiftError::Auth(message)),
            Classified::ApiFailure { status, message } => {
                Err(DataSiftError::Api { status, message })
            }
            Classified::ServerFailure { detail, .. } => {
                Err(DataSiftError::ApiFailure(detail))
            }
            Classified::Unclassified { status, body } => {
                Err(DataSiftError::UnexpectedStatus { status, body })
            }
        }
    }
}
