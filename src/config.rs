//! Simulation-wide tunables.
//!
//! Grounded on `moonblokz-radio-simulator`'s `RadioModuleConfig`/`Scene`:
//! constants that vary across scenarios are grouped into one `serde`-able
//! struct with a `Default` impl, rather than scattered as free-standing
//! constants, so a harness can load a scenario's tuning from a file without
//! this crate ever touching the filesystem itself.

use serde::{Deserialize, Serialize};

use crate::error::SimError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Multiplier applied to `path_len · transmission_delay` to estimate a
    /// round-trip timeout (`spec.md` §4.6.1, §9 Open Questions: the
    /// constant varies across source revisions; this crate fixes a
    /// configurable default rather than guessing a single "correct" value).
    /// Default `300` mirrors `master_node.py`'s
    /// `ACK_TIMEOUT · RETRANSMISSIONS / 2` (`200 · 3 / 2`).
    pub rtt_factor: u64,
    /// Ack wait per attempt, in simulated ticks (`spec.md` §4.5/§6).
    pub ack_timeout: u64,
    /// Max retransmissions before `transmit_with_ack` gives up (`spec.md` §6).
    pub retransmissions: u32,
    /// Whether the ack sub-protocol is active at all (`spec.md` §4.5: "used
    /// when enabled").
    pub ack_enabled: bool,
    /// Default edge noise for newly-created node-graph edges, `∈ [0, 2]`
    /// (`spec.md` §6).
    pub initial_noise: f64,
    /// Exponential-smoothing weight applied to the *previous* noise sample
    /// (`spec.md` §3/§8): `noise_new = alpha·noise_old + (1−alpha)·observed`.
    pub alpha: f64,
    /// Master send-queue concurrency: `false` (default) queues a second
    /// `send_message` while one is pending; `true` rejects it immediately
    /// with `SimError::Busy` (`spec.md` §7, resolved in `DESIGN.md`).
    pub exclusive_send: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            rtt_factor: 300,
            ack_timeout: 200,
            retransmissions: 3,
            ack_enabled: false,
            initial_noise: 0.5,
            alpha: 2.0 / 3.0,
            exclusive_send: false,
        }
    }
}

impl SimConfig {
    /// Parse a config from a JSON string. Takes the string itself rather than
    /// a path so a harness can load it from wherever it likes without this
    /// crate ever touching the filesystem.
    pub fn from_json(s: &str) -> Result<Self, SimError> {
        serde_json::from_str(s).map_err(|e| SimError::ConfigParse { message: e.to_string() })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("SimConfig always serializes")
    }

    /// Parse a config from a TOML string (`spec.md` §9's scenario-tuning use
    /// case, the other common ambient format besides JSON).
    pub fn from_toml(s: &str) -> Result<Self, SimError> {
        toml::from_str(s).map_err(|e| SimError::ConfigParse { message: e.to_string() })
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).expect("SimConfig always serializes")
    }
}
