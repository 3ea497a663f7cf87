//! redb table definitions for the deployment store.
//!
//! Both tables use `&str` keys and `&[u8]` values (JSON-serialized types).

use redb::TableDefinition;

/// Deployments keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Bundles keyed by `{len}:{deployment_id}:{bundle_id}`, where `len` is the
/// byte length of the deployment ID.
pub const BUNDLES: TableDefinition<&str, &[u8]> = TableDefinition::new("bundles");

/// Key prefix shared by every bundle of a deployment, and only by them.
///
/// IDs may contain `:`. The length prefix keeps `a` + `b:c` and `a:b` + `c`
/// apart.
pub fn bundle_prefix(deployment_id: &str) -> String {
    format!("{}:{deployment_id}:", deployment_id.len())
}

/// Full key of one bundle.
pub fn bundle_key(deployment_id: &str, bundle_id: &str) -> String {
    format!("{}{bundle_id}", bundle_prefix(deployment_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_separators_do_not_collide() {
        assert_ne!(bundle_key("a", "b:c"), bundle_key("a:b", "c"));
        assert!(!bundle_key("a:b", "c").starts_with(&bundle_prefix("a")));
        assert!(bundle_key("a", "b:c").starts_with(&bundle_prefix("a")));
    }
}
