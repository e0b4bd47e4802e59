//! The cloud resource tag schema. Tags are the broker's
//! only shared state — there is no broker-local datastore — so every piece
//! of per-instance metadata that isn't derivable from configuration lives
//! here, keyed by the constants below.

use std::collections::BTreeMap;

pub const BROKER_NAME: &str = "Broker Name";
pub const CREATED_BY: &str = "Created by";
pub const CREATED_AT: &str = "Created at";
pub const RESTORED_FROM_SNAPSHOT: &str = "Restored from Snapshot";
pub const PENDING_UPDATE_SETTINGS: &str = "PendingUpdateSettings";
pub const PENDING_RESET: &str = "PendingReset";
pub const ORIGINAL_RDS_INSTANCE: &str = "OriginalRDSInstance";
pub const CHARGEABLE_ENTITY: &str = "Chargeable Entity";
pub const SKIP_FINAL_SNAPSHOT: &str = "SkipFinalSnapshot";
pub const PARAMETER_GROUP_NAME: &str = "parameterGroupName";
pub const PLAN_ID: &str = "Plan Id";
pub const SERVICE_ID: &str = "Service Id";

/// `BTreeMap` (not `HashMap`) so that tag iteration order is deterministic —
/// some call sites diff two tag sets and a stable order keeps that diffing
/// trivial to unit test.
pub type Tags = BTreeMap<String, String>;

pub fn base_tags(broker_name: &str, chargeable_entity: &str) -> Tags {
    let mut tags = Tags::new();
    tags.insert(BROKER_NAME.to_owned(), broker_name.to_owned());
    tags.insert(CREATED_BY.to_owned(), broker_name.to_owned());
    tags.insert(CHARGEABLE_ENTITY.to_owned(), chargeable_entity.to_owned());
    tags
}

pub fn is_true(tags: &Tags, key: &str) -> bool {
    tags.get(key).map(|v| v == "true").unwrap_or(false)
}

pub fn set_bool(tags: &mut Tags, key: &str, value: bool) {
    if value {
        tags.insert(key.to_owned(), "true".to_owned());
    } else {
        tags.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_tags_carry_broker_identity() {
        let tags = base_tags("rds-broker", "org-1");
        assert_eq!(tags.get(BROKER_NAME).map(String::as_str), Some("rds-broker"));
        assert_eq!(
            tags.get(CHARGEABLE_ENTITY).map(String::as_str),
            Some("org-1")
        );
    }

    #[test]
    fn set_bool_round_trips() {
        let mut tags = Tags::new();
        set_bool(&mut tags, PENDING_RESET, true);
        assert!(is_true(&tags, PENDING_RESET));
        set_bool(&mut tags, PENDING_RESET, false);
        assert!(!is_true(&tags, PENDING_RESET));
        assert!(!tags.contains_key(PENDING_RESET));
    }
}
