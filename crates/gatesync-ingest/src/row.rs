//! Mapping deployment-table rows onto store records.
//!
//! Columns:
//! - `id`: required, non-empty
//! - `bundle_config_json`: required JSON object describing the bundles
//! - `data_scope_id`: optional
//! - `config_json`: optional, must be JSON when present
//! - `created`, `updated`: optional unix seconds, integer or numeric string

use std::collections::HashSet;

use serde::Deserialize;

use gatesync_state::{Bundle, Deployment};

use crate::events::Row;

/// Bundle description as found in `bundle_config_json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleSpec {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    uri: String,
    #[serde(default)]
    checksum_type: String,
    #[serde(default)]
    checksum: String,
}

#[derive(Debug, Deserialize)]
struct BundleConfig {
    #[serde(flatten)]
    primary: BundleSpec,
    #[serde(default)]
    bundles: Vec<BundleSpec>,
}

/// Map an insert/update/snapshot row to a deployment and its bundles.
pub fn parse_deployment_row(row: &Row) -> Result<(Deployment, Vec<Bundle>), String> {
    let id = row_id(row)?;
    let bundle_config = text(row, "bundle_config_json")?.ok_or("missing bundle_config_json")?;
    let parsed: BundleConfig =
        serde_json::from_str(&bundle_config).map_err(|e| format!("invalid bundle_config_json: {e}"))?;

    let config = text(row, "config_json")?;
    if let Some(raw) = &config {
        serde_json::from_str::<serde_json::Value>(raw).map_err(|e| format!("invalid config_json: {e}"))?;
    }

    let mut deployment = Deployment::new(&id, text(row, "data_scope_id")?.unwrap_or_default(), bundle_config.clone());
    deployment.config = config;
    deployment.created_at = timestamp(row, "created")?;
    deployment.updated_at = timestamp(row, "updated")?;

    let specs = std::iter::once(parsed.primary).chain(parsed.bundles);
    let mut seen = HashSet::new();
    let mut bundles = Vec::new();
    for (index, spec) in specs.enumerate() {
        let bundle_id = spec.id.filter(|b| !b.is_empty()).unwrap_or_else(|| index.to_string());
        if !seen.insert(bundle_id.clone()) {
            return Err(format!("duplicate bundle id {bundle_id:?}"));
        }
        if spec.uri.is_empty() {
            return Err(format!("bundle {bundle_id:?} has no uri"));
        }
        let mut bundle = Bundle::new(&id, bundle_id, spec.uri, spec.checksum_type, spec.checksum);
        bundle.name = spec.name;
        bundles.push(bundle);
    }
    Ok((deployment, bundles))
}

/// The deployment ID a row refers to.
pub fn row_id(row: &Row) -> Result<String, String> {
    text(row, "id")?
        .filter(|id| !id.is_empty())
        .ok_or_else(|| "missing id".to_string())
}

fn text(row: &Row, column: &str) -> Result<Option<String>, String> {
    match row.get(column).map(|c| &c.value) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        // Some producers embed JSON columns as structured values.
        Some(other @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => Ok(Some(other.to_string())),
        Some(other) => Err(format!("column {column} is not text: {other}")),
    }
}

fn timestamp(row: &Row, column: &str) -> Result<u64, String> {
    match row.get(column).map(|c| &c.value) {
        None | Some(serde_json::Value::Null) => Ok(0),
        Some(serde_json::Value::Number(n)) => n.as_u64().ok_or_else(|| format!("column {column} is not unix seconds: {n}")),
        Some(serde_json::Value::String(s)) if s.is_empty() => Ok(0),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| format!("column {column} is not unix seconds: {s:?}")),
        Some(other) => Err(format!("column {column} is not unix seconds: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ColumnVal;

    fn row(columns: &[(&str, serde_json::Value)]) -> Row {
        columns
            .iter()
            .map(|(name, value)| (name.to_string(), ColumnVal::new(value.clone())))
            .collect()
    }

    fn bundle_json() -> serde_json::Value {
        serde_json::json!(r#"{"uri":"file:///b.zip","checksumType":"crc-32","checksum":"cbf43926"}"#)
    }

    #[test]
    fn maps_minimal_row() {
        let (deployment, bundles) = parse_deployment_row(&row(&[("id", "d1".into()), ("bundle_config_json", bundle_json())])).unwrap();
        assert_eq!(deployment.id, "d1");
        assert_eq!(deployment.scope_id, "");
        assert_eq!(deployment.created_at, 0);
        assert!(deployment.config.is_none());

        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].id, "0");
        assert_eq!(bundles[0].deployment_id, "d1");
        assert_eq!(bundles[0].uri, "file:///b.zip");
        assert_eq!(bundles[0].checksum_type, "crc-32");
        assert!(bundles[0].local_uri.is_none());
    }

    #[test]
    fn maps_full_row_with_sub_bundles() {
        let config = serde_json::json!({
            "id": "main", "name": "proxy", "uri": "https://cdn/a.zip", "checksumType": "sha256", "checksum": "aa",
            "bundles": [
                { "uri": "https://cdn/b.zip", "checksumType": "md5", "checksum": "bb" },
                { "id": "extra", "uri": "https://cdn/c.zip", "checksumType": "md5", "checksum": "cc" }
            ]
        });
        let (deployment, bundles) = parse_deployment_row(&row(&[
            ("id", "d1".into()),
            ("data_scope_id", "scope".into()),
            ("bundle_config_json", config),
            ("config_json", r#"{"env":"prod"}"#.into()),
            ("created", 1_700_000_000u64.into()),
            ("updated", "1700000100".into()),
        ]))
        .unwrap();

        assert_eq!(deployment.scope_id, "scope");
        assert_eq!(deployment.config.as_deref(), Some(r#"{"env":"prod"}"#));
        assert_eq!(deployment.created_at, 1_700_000_000);
        assert_eq!(deployment.updated_at, 1_700_000_100);

        let ids: Vec<_> = bundles.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["main", "1", "extra"]);
        assert_eq!(bundles[0].name.as_deref(), Some("proxy"));
    }

    #[test]
    fn rejects_malformed_rows() {
        assert!(parse_deployment_row(&row(&[("bundle_config_json", bundle_json())])).is_err());
        assert!(parse_deployment_row(&row(&[("id", "".into()), ("bundle_config_json", bundle_json())])).is_err());
        assert!(parse_deployment_row(&row(&[("id", "d1".into())])).is_err());
        assert!(parse_deployment_row(&row(&[("id", "d1".into()), ("bundle_config_json", "{not json".into())])).is_err());
        assert!(parse_deployment_row(&row(&[("id", "d1".into()), ("bundle_config_json", r#"{"name":"x"}"#.into())])).is_err());
        assert!(
            parse_deployment_row(&row(&[
                ("id", "d1".into()),
                ("bundle_config_json", bundle_json()),
                ("config_json", "{oops".into()),
            ]))
            .is_err()
        );
        assert!(
            parse_deployment_row(&row(&[
                ("id", "d1".into()),
                ("bundle_config_json", bundle_json()),
                ("created", "yesterday".into()),
            ]))
            .is_err()
        );
    }

    #[test]
    fn rejects_duplicate_bundle_ids() {
        let config = serde_json::json!({
            "id": "x", "uri": "file:///a", "bundles": [{ "id": "x", "uri": "file:///b" }]
        });
        let err = parse_deployment_row(&row(&[("id", "d1".into()), ("bundle_config_json", config)])).unwrap_err();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn delete_row_needs_only_id() {
        assert_eq!(row_id(&row(&[("id", "d1".into())])).unwrap(), "d1");
        assert!(row_id(&row(&[])).is_err());
    }
}
