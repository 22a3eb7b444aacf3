//! Session mode.

use serde::{Deserialize, Serialize};

/// How inbound keystrokes are routed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// No live channel. Keystrokes trigger a reconnect.
    #[default]
    Disconnected,
    /// Interactive passthrough.
    DefaultInput,
    /// Awaiting the sentinel echo that ends a bulk response.
    DefaultReceive,
    /// Output only, input suppressed.
    Report,
}

impl Mode {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::DefaultInput => "default_input",
            Self::DefaultReceive => "default_receive",
            Self::Report => "report",
        };
        f.write_str(name)
    }
}
