//! Async Operation tokens. The broker keeps no operation
//! table, so the OSBAPI `operation` field doubles as a continuation: it
//! carries everything `LastOperation` needs to resume the state machine.
//! Encoding decision (see `DESIGN.md`): base64url(JSON), version-prefixed,
//! following the pack's convention of driving wire shapes off
//! `serde`-derived structs rather than a bespoke binary codec.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

const TOKEN_VERSION_PREFIX: &str = "v1.";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationToken {
    Provision {
        instance_id: String,
        service_id: String,
        plan_id: String,
        issued_at: DateTime<Utc>,
    },
    Reboot {
        instance_id: String,
    },
    UpdateExtensions {
        instance_id: String,
        service_id: String,
        plan_id: String,
        parameter_group_name: String,
        updated_extensions: Vec<String>,
        reboot_required: bool,
    },
    UpdateAttributes {
        instance_id: String,
    },
    Deprovision {
        instance_id: String,
    },
}

impl OperationToken {
    pub fn instance_id(&self) -> &str {
        match self {
            OperationToken::Provision { instance_id, .. }
            | OperationToken::Reboot { instance_id }
            | OperationToken::UpdateExtensions { instance_id, .. }
            | OperationToken::UpdateAttributes { instance_id }
            | OperationToken::Deprovision { instance_id } => instance_id,
        }
    }

    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("OperationToken always serializes");
        format!("{TOKEN_VERSION_PREFIX}{}", URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(token: &str) -> Result<Self, BrokerError> {
        let body = token.strip_prefix(TOKEN_VERSION_PREFIX).ok_or_else(|| {
            BrokerError::ValidationError(format!("unsupported operation token version: {token:?}"))
        })?;
        let bytes = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|e| BrokerError::ValidationError(format!("malformed operation token: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| BrokerError::ValidationError(format!("malformed operation token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_and_decode() {
        let token = OperationToken::Provision {
            instance_id: "instance-1".to_owned(),
            service_id: "svc-1".to_owned(),
            plan_id: "plan-1".to_owned(),
            issued_at: Utc::now(),
        };
        let encoded = token.encode();
        assert!(encoded.starts_with("v1."));
        let decoded = OperationToken::decode(&encoded).unwrap();
        assert_eq!(decoded.instance_id(), "instance-1");
    }

    #[test]
    fn rejects_tokens_from_an_unknown_version() {
        let err = OperationToken::decode("v2.whatever").unwrap_err();
        assert!(matches!(err, BrokerError::ValidationError(_)));
    }

    #[test]
    fn rejects_garbage_tokens() {
        let err = OperationToken::decode("v1.not-valid-base64!!").unwrap_err();
        assert!(matches!(err, BrokerError::ValidationError(_)));
    }
}
