//! Inbound status report payloads.
//!
//! A batch body is either one result object or an array of them:
//!
//! ```json
//! [{ "id": "d1", "status": "FAIL", "errorCode": 100, "message": "bad juju",
//!    "bundleErrors": [{ "bundleId": "0", "errorCode": 7, "reason": "zombies" }] }]
//! ```
//!
//! Payloads are parsed loosely and then validated as a whole, so that one
//! bad entry rejects the batch before anything is applied.

use std::collections::HashSet;

use serde::Deserialize;

use gatesync_state::{BundleError, DeploymentStatus, StatusUpdate};

use crate::error::{ReportError, ReportResult};

/// Outcome an agent may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedStatus {
    Success,
    Fail,
}

impl ReportedStatus {
    fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("success") {
            Some(Self::Success)
        } else if raw.eq_ignore_ascii_case("fail") {
            Some(Self::Fail)
        } else {
            None
        }
    }
}

impl From<ReportedStatus> for DeploymentStatus {
    fn from(status: ReportedStatus) -> Self {
        match status {
            ReportedStatus::Success => DeploymentStatus::Success,
            ReportedStatus::Fail => DeploymentStatus::Fail,
        }
    }
}

/// One result object as posted by an agent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub bundle_errors: Vec<BundleErrorPayload>,
    /// Nested form of the error fields; top-level fields win when both are given.
    #[serde(default)]
    pub error: Option<ErrorPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub error_details: Vec<BundleErrorPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleErrorPayload {
    pub bundle_id: String,
    pub error_code: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchBody {
    Many(Vec<ResultPayload>),
    One(ResultPayload),
}

/// A validated result, ready to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidResult {
    pub id: String,
    pub update: StatusUpdate,
}

/// Parse and validate a `POST /deployments` body.
pub fn parse_batch(body: &[u8]) -> ReportResult<Vec<ValidResult>> {
    let payloads = match serde_json::from_slice::<BatchBody>(body) {
        Ok(BatchBody::Many(many)) => many,
        Ok(BatchBody::One(one)) => vec![one],
        Err(e) => return Err(ReportError::Validation(format!("malformed body: {e}"))),
    };

    let mut seen = HashSet::new();
    let mut results = Vec::with_capacity(payloads.len());
    for (index, payload) in payloads.into_iter().enumerate() {
        let id = payload
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ReportError::Validation(format!("result {index}: missing id")))?;
        if !seen.insert(id.clone()) {
            return Err(ReportError::Validation(format!("result {index}: duplicate id {id}")));
        }
        let update = validate(&payload).map_err(|reason| ReportError::Validation(format!("result {index}: {reason}")))?;
        results.push(ValidResult { id, update });
    }
    Ok(results)
}

/// Parse and validate a `POST /deployments/{id}` body.
pub fn parse_single(id: &str, body: &[u8]) -> ReportResult<ValidResult> {
    let payload: ResultPayload =
        serde_json::from_slice(body).map_err(|e| ReportError::Validation(format!("malformed body: {e}")))?;
    if let Some(body_id) = payload.id.as_deref() {
        if !body_id.is_empty() && body_id != id {
            return Err(ReportError::Validation(format!("body id {body_id} does not match path id {id}")));
        }
    }
    let update = validate(&payload).map_err(ReportError::Validation)?;
    Ok(ValidResult {
        id: id.to_string(),
        update,
    })
}

fn validate(payload: &ResultPayload) -> Result<StatusUpdate, String> {
    let status = ReportedStatus::parse(&payload.status)
        .ok_or_else(|| format!("status must be SUCCESS or FAIL, got {:?}", payload.status))?;

    let nested = payload.error.clone().unwrap_or_default();
    let mut update = match status {
        ReportedStatus::Success => StatusUpdate::success(),
        ReportedStatus::Fail => {
            let code = payload
                .error_code
                .or(nested.error_code)
                .filter(|code| *code != 0)
                .ok_or("FAIL requires a non-zero errorCode")?;
            let message = payload.message.clone().or(nested.reason).unwrap_or_default();
            StatusUpdate::fail(code, message)
        }
    };
    let details = if payload.bundle_errors.is_empty() {
        &nested.error_details
    } else {
        &payload.bundle_errors
    };
    update.bundle_errors = details
        .iter()
        .map(|e| BundleError {
            bundle_id: e.bundle_id.clone(),
            error_code: e.error_code,
            reason: e.reason.clone(),
        })
        .collect();
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_object_body() {
        let results = parse_batch(br#"{"id":"d1","status":"success"}"#).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "d1");
        assert_eq!(results[0].update, StatusUpdate::success());
    }

    #[test]
    fn parses_array_body() {
        let body = br#"[
            {"id":"d1","status":"SUCCESS"},
            {"id":"d2","status":"FAIL","errorCode":100,"message":"bad juju",
             "bundleErrors":[{"bundleId":"0","errorCode":7,"reason":"zombies"}]}
        ]"#;
        let results = parse_batch(body).unwrap();
        assert_eq!(results.len(), 2);

        let fail = &results[1].update;
        assert_eq!(fail.status, DeploymentStatus::Fail);
        assert_eq!(fail.error_code, Some(100));
        assert_eq!(fail.error_message.as_deref(), Some("bad juju"));
        assert_eq!(fail.bundle_errors[0].bundle_id, "0");
    }

    #[test]
    fn one_bad_entry_rejects_batch() {
        let body = br#"[{"id":"d1","status":"SUCCESS"},{"id":"d2","status":"meh"}]"#;
        let err = parse_batch(body).unwrap_err();
        assert!(matches!(err, ReportError::Validation(msg) if msg.starts_with("result 1")));
    }

    #[test]
    fn rejects_missing_id_duplicates_and_bad_json() {
        assert!(parse_batch(br#"[{"status":"SUCCESS"}]"#).is_err());
        assert!(parse_batch(br#"[{"id":"","status":"SUCCESS"}]"#).is_err());
        assert!(parse_batch(br#"[{"id":"a","status":"SUCCESS"},{"id":"a","status":"SUCCESS"}]"#).is_err());
        assert!(parse_batch(b"not json").is_err());
        assert!(parse_batch(b"42").is_err());
    }

    #[test]
    fn fail_requires_error_code() {
        assert!(parse_batch(br#"{"id":"d1","status":"FAIL"}"#).is_err());
        assert!(parse_batch(br#"{"id":"d1","status":"FAIL","errorCode":0}"#).is_err());
    }

    #[test]
    fn single_uses_path_id() {
        let result = parse_single("d1", br#"{"status":"FAIL","errorCode":100,"message":"bad juju"}"#).unwrap();
        assert_eq!(result.id, "d1");
        assert_eq!(result.update, StatusUpdate::fail(100, "bad juju"));

        assert!(parse_single("d1", br#"{"id":"d1","status":"SUCCESS"}"#).is_ok());
        assert!(parse_single("d1", br#"{"id":"d2","status":"SUCCESS"}"#).is_err());
    }

    #[test]
    fn accepts_nested_error_object() {
        let body = br#"{"status":"FAIL","error":{"errorCode":100,"reason":"bad juju",
            "errorDetails":[{"bundleId":"bun","errorCode":100,"reason":"Zombies"}]}}"#;
        let result = parse_single("d1", body).unwrap();
        assert_eq!(result.update.error_code, Some(100));
        assert_eq!(result.update.error_message.as_deref(), Some("bad juju"));
        assert_eq!(result.update.bundle_errors[0].reason, "Zombies");
    }

    #[test]
    fn empty_array_is_valid() {
        assert!(parse_batch(b"[]").unwrap().is_empty());
    }
}
