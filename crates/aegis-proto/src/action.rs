//! Fixed remediation action vocabulary (§4.6).
//!
//! The remediation gate selects one of these from a policy table keyed by
//! `(source, kind)`. `None` is the default when the table has no entry for
//! a given key — callers must never substitute a guessed default.

use serde::{Deserialize, Serialize};

/// A remediation action the effector can execute.
///
/// Idempotency at the effector boundary is keyed by `(event_id, action_kind)`
/// — this type is the `action_kind` half of that key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    DisableCredential,
    RevokeNetworkIngress,
    QuarantineInstance,
    RotateSecret,
    BlockAddress,
    None,
}

impl ActionKind {
    /// `true` for every variant except the `None` no-op.
    pub fn is_actionable(self) -> bool {
        !matches!(self, ActionKind::None)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionKind::DisableCredential => "DISABLE_CREDENTIAL",
            ActionKind::RevokeNetworkIngress => "REVOKE_NETWORK_INGRESS",
            ActionKind::QuarantineInstance => "QUARANTINE_INSTANCE",
            ActionKind::RotateSecret => "ROTATE_SECRET",
            ActionKind::BlockAddress => "BLOCK_ADDRESS",
            ActionKind::None => "NONE",
        };
        write!(f, "{s}")
    }
}
