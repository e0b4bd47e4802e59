//! Parameter Group Planner. Computes the deterministic
//! parameter-group name for a given extension set and ensures it exists via
//! the Provider Adapter. Never mutates a group after creation — new
//! extension sets always get a new name.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::error::BrokerError;
use crate::provider::ProviderAdapter;

/// Extensions that require an entry in `shared_preload_libraries` and thus
/// only take effect after a reboot. Configurable via `rds_config`; this is the documented default.
pub const DEFAULT_PRELOAD_LIBRARIES: &[&str] = &["pg_stat_statements", "auto_explain"];

pub struct ParameterGroupPlanner<'a> {
    db_prefix: String,
    known_preload_libraries: BTreeSet<String>,
    provider: &'a dyn ProviderAdapter,
}

impl<'a> ParameterGroupPlanner<'a> {
    pub fn new(
        db_prefix: impl Into<String>,
        known_preload_libraries: impl IntoIterator<Item = String>,
        provider: &'a dyn ProviderAdapter,
    ) -> Self {
        Self {
            db_prefix: db_prefix.into(),
            known_preload_libraries: known_preload_libraries.into_iter().collect(),
            provider,
        }
    }

    /// Canonicalizes `extensions`, derives the group name, and ensures the
    /// group exists on the provider. Idempotent: calling this twice with
    /// the same `(engine_version, extensions)` creates at most one group.
    pub async fn plan_for(
        &self,
        engine_family: &str,
        extensions: &[String],
    ) -> Result<String, BrokerError> {
        let canonical = canonicalize(extensions);
        let name = self.group_name(engine_family, &canonical);
        let preload: Vec<String> = canonical
            .iter()
            .filter(|ext| self.known_preload_libraries.contains(*ext))
            .cloned()
            .collect();
        let mut settings = std::collections::BTreeMap::new();
        // Even an empty preload set still produces a named group, so a
        // later comparison can observe extension removal.
        settings.insert(
            "shared_preload_libraries".to_owned(),
            preload.join(","),
        );
        self.provider
            .ensure_parameter_group(&name, engine_family, &settings)
            .await?;
        Ok(name)
    }

    /// Derives the deterministic name without touching the provider —
    /// used by `LastOperation` to check whether an instance's attached
    /// group already matches the requested extension set.
    pub fn group_name(&self, engine_family: &str, canonical_extensions: &[String]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical_extensions.join(",").as_bytes());
        hasher.update(engine_family.as_bytes());
        let digest = hasher.finalize();
        let hash_prefix = hex::encode(digest)[..12].to_owned();
        format!("{}-{}-{}", self.db_prefix, hash_prefix, engine_family)
    }
}

/// Lexicographic sort + dedup of an extension list into its canonical form.
pub fn canonicalize(extensions: &[String]) -> Vec<String> {
    let set: BTreeSet<String> = extensions.iter().cloned().collect();
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::FakeProvider;

    #[test]
    fn canonicalize_sorts_and_dedups() {
        let input = vec!["postgis".to_owned(), "uuid-ossp".to_owned(), "postgis".to_owned()];
        assert_eq!(
            canonicalize(&input),
            vec!["postgis".to_owned(), "uuid-ossp".to_owned()]
        );
    }

    #[tokio::test]
    async fn same_canonicalization_produces_the_same_name() {
        let provider = FakeProvider::default();
        let planner = ParameterGroupPlanner::new(
            "rdsbroker",
            DEFAULT_PRELOAD_LIBRARIES.iter().map(|s| s.to_string()),
            &provider,
        );
        let e1 = vec!["postgis".to_owned(), "uuid-ossp".to_owned()];
        let e2 = vec!["uuid-ossp".to_owned(), "postgis".to_owned()];
        let n1 = planner.plan_for("postgres15", &e1).await.unwrap();
        let n2 = planner.plan_for("postgres15", &e2).await.unwrap();
        assert_eq!(n1, n2);
    }

    #[tokio::test]
    async fn preload_requiring_extension_changes_the_name() {
        let provider = FakeProvider::default();
        let planner = ParameterGroupPlanner::new(
            "rdsbroker",
            DEFAULT_PRELOAD_LIBRARIES.iter().map(|s| s.to_string()),
            &provider,
        );
        let without = planner.plan_for("postgres15", &[]).await.unwrap();
        let with = planner
            .plan_for("postgres15", &["pg_stat_statements".to_owned()])
            .await
            .unwrap();
        assert_ne!(without, with);
    }

    #[tokio::test]
    async fn ensure_parameter_group_is_idempotent() {
        let provider = FakeProvider::default();
        let planner = ParameterGroupPlanner::new(
            "rdsbroker",
            DEFAULT_PRELOAD_LIBRARIES.iter().map(|s| s.to_string()),
            &provider,
        );
        let exts = vec!["pg_stat_statements".to_owned()];
        planner.plan_for("postgres15", &exts).await.unwrap();
        planner.plan_for("postgres15", &exts).await.unwrap();
        assert_eq!(provider.parameter_group_create_calls(), 1);
    }
}
