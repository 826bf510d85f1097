//! Authentication mode (spec §4.8): a small enum-with-serde policy knob.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Accept any peer matching the loopback/private-network predicate.
    LocalTrusted,
    /// Require a bearer token or API key from the in-memory table.
    ExternalSecure,
    /// Local-trusted first, fall back to external-secure.
    #[default]
    Dual,
}
