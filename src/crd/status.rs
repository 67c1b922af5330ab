//! # Lifecycle Status
//!
//! Status shared by every parent resource the operator reconciles.
//!
//! ```text
//! Created ──► Reconciling ──► Available
//!                 ▲    │          │
//!                 │    ▼          │
//!                 └─ ReconcileFailed ◄┘
//!
//! any state ──► Unmanaged ──► Reconciling
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a parent resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ConfigState {
    Created,
    Reconciling,
    Available,
    ReconcileFailed,
    Unmanaged,
}

impl ConfigState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Reconciling => "Reconciling",
            Self::Available => "Available",
            Self::ReconcileFailed => "ReconcileFailed",
            Self::Unmanaged => "Unmanaged",
        }
    }

    /// Whether a parent in `self` may move to `next`.
    ///
    /// Re-entering the same state is allowed so the error message and
    /// addresses can be refreshed.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConfigState::{Available, Created, ReconcileFailed, Reconciling, Unmanaged};

        if self == next || next == Unmanaged {
            return true;
        }
        match self {
            Created | Unmanaged => next == Reconciling,
            Reconciling => matches!(next, Available | ReconcileFailed),
            // A pass over an unchanged generation skips the Reconciling write
            Available => matches!(next, Reconciling | ReconcileFailed),
            ReconcileFailed => next == Reconciling,
        }
    }
}

impl fmt::Display for ConfigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a parent resource
///
/// Unset fields serialize as `null` so that merge-patching the status
/// clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleStatus {
    /// Current lifecycle state
    #[serde(default)]
    pub state: Option<ConfigState>,
    /// Message of the first error of the last failed pass
    #[serde(default)]
    pub error_message: Option<String>,
    /// Externally observable addresses
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Generation last converged (successfully or not)
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// When `state` last changed (RFC3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
}
