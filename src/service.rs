//! Request/response layer in front of the three core operations.
//!
//! Requests are JSON objects tagged by `kind`. Failures come back as
//! `{"error": ..., "type": ...}` objects instead of aborting the whole batch.

use crate::config::SolverConfig;
use crate::error::{PortfolioError, Result};
use crate::portfolio::optimize_continuous_with;
use crate::selector::select_binary_with;
use crate::spectrum::extract_spectrum;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

fn default_lambda() -> f64 {
    0.5
}

fn default_reps() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrumRequest {
    /// `null` entries are missing samples
    pub series: Vec<Option<f64>>,
}

impl SpectrumRequest {
    /// Build from raw samples, mapping `NaN` to a missing entry.
    pub fn from_samples(samples: &[f64]) -> Self {
        Self {
            series: samples.iter().map(|&x| (!x.is_nan()).then_some(x)).collect(),
        }
    }

    fn samples(&self) -> Vec<f64> {
        self.series.iter().map(|x| x.unwrap_or(f64::NAN)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuousRequest {
    pub mu: Vec<f64>,
    pub cov: Vec<Vec<f64>>,
    #[serde(default = "default_lambda")]
    pub lam: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryRequest {
    pub mu: Vec<f64>,
    pub cov: Vec<Vec<f64>>,
    #[serde(default = "default_lambda")]
    pub lam: f64,
    #[serde(default = "default_reps")]
    pub reps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    Spectrum(SpectrumRequest),
    Continuous(ContinuousRequest),
    Binary(BinaryRequest),
}

impl Request {
    pub fn execute(&self, config: &SolverConfig) -> Result<Value> {
        let value = match self {
            Request::Spectrum(req) => serde_json::to_value(extract_spectrum(&req.samples())?)?,
            Request::Continuous(req) => {
                serde_json::to_value(optimize_continuous_with(&req.mu, &req.cov, req.lam, config)?)?
            }
            Request::Binary(req) => {
                serde_json::to_value(select_binary_with(&req.mu, &req.cov, req.lam, req.reps, config)?)?
            }
        };
        Ok(value)
    }
}

/// Run one request; errors become an error object.
pub fn handle(request: &Request, config: &SolverConfig) -> Value {
    match request.execute(config) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("request failed: {}", e);
            error_response(&e)
        }
    }
}

pub fn error_response(err: &PortfolioError) -> Value {
    json!({ "error": err.to_string(), "type": err.kind() })
}

/// Handle a JSON document holding one request or an array of them.
///
/// Only unparseable JSON is an `Err`; a malformed element of a batch gets its
/// own error object and the rest still run.
pub fn handle_json(text: &str, config: &SolverConfig) -> Result<Value> {
    let payload: Value = serde_json::from_str(text)?;
    Ok(match payload {
        Value::Array(items) => Value::Array(items.into_iter().map(|item| handle_value(item, config)).collect()),
        single => handle_value(single, config),
    })
}

fn handle_value(value: Value, config: &SolverConfig) -> Value {
    match serde_json::from_value::<Request>(value) {
        Ok(request) => handle(&request, config),
        Err(e) => error_response(&PortfolioError::from(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_request_models() {
        let req: BinaryRequest = serde_json::from_str(r#"{"mu": [0.1], "cov": [[1.0]]}"#).unwrap();
        assert_eq!(req.lam, 0.5);
        assert_eq!(req.reps, 1);

        let req: ContinuousRequest = serde_json::from_str(r#"{"mu": [0.1], "cov": [[1.0]]}"#).unwrap();
        assert_eq!(req.lam, 0.5);
    }

    #[test]
    fn test_continuous_response_fields() {
        let text = r#"{"kind": "continuous", "mu": [0.1, 0.2], "cov": [[1, 0], [0, 1]], "lam": 0.5}"#;
        let response = handle_json(text, &SolverConfig::default()).unwrap();
        assert_eq!(response["success"], json!(true));
        assert_eq!(response["weights"].as_array().unwrap().len(), 2);
        assert!(response["message"].is_string());
        assert!(response["objective"].is_number());
    }

    #[test]
    fn test_short_series_becomes_error_object() {
        let request = Request::Spectrum(SpectrumRequest::from_samples(&[1.0, 2.0, 3.0]));
        let response = handle(&request, &SolverConfig::default());
        assert_eq!(response["type"], json!("InsufficientDataError"));
        assert!(response["error"].as_str().unwrap().contains("at least 8"));
    }

    #[test]
    fn test_null_samples_are_missing() {
        let text = r#"{"kind": "spectrum", "series": [1, 3, null, 1, 3, null, 1, 3]}"#;
        let response = handle_json(text, &SolverConfig::default()).unwrap();
        assert_eq!(response["stats"]["n"], json!(8));
        assert_eq!(response["freqs"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_batch_keeps_order_and_isolates_errors() {
        let text = r#"[
            {"kind": "binary", "mu": [-1, -1], "cov": [[1, 0], [0, 1]]},
            {"kind": "continuous", "mu": [0.1, 0.2], "cov": [[1, 0, 0], [0, 1, 0], [0, 0, 1]]},
            {"kind": "unknown"}
        ]"#;
        let response = handle_json(text, &SolverConfig::default()).unwrap();
        let items = response.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["selection"].as_array().unwrap().len(), 2);
        assert_eq!(items[1]["type"], json!("ShapeMismatchError"));
        assert_eq!(items[2]["type"], json!("JsonError"));
    }

    #[test]
    fn test_huge_reps_still_answers() {
        let text = r#"[
            {"kind": "binary", "mu": [0.1, 0.2], "cov": [[1, 0], [0, 1]], "reps": 18446744073709551615},
            {"kind": "spectrum", "series": [1, 2, 3, 4, 5, 6, 7, 8]}
        ]"#;
        let response = handle_json(text, &SolverConfig::default()).unwrap();
        let items = response.as_array().unwrap();
        assert_eq!(items[0]["strategy"], json!("heuristic"));
        assert_eq!(items[1]["stats"]["n"], json!(8));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(handle_json("{not json", &SolverConfig::default()).is_err());
    }
}
