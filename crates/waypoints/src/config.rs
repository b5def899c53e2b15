//! Runtime configuration for the coordination core.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::gate::{GateWaitSpec, ResetAfter, StuckGatePolicy, WaitForever};
use crate::pause::SettlePolicy;

/// Timing knobs for the queue, the lease registry and the generation worker.
///
/// Every field is optional in TOML; missing fields take the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
	/// Generation tick interval in milliseconds.
	#[serde(default = "default_tick_interval_ms")]
	pub tick_interval_ms: u64,
	/// Upper bound between acknowledgement gate re-checks, in milliseconds.
	#[serde(default = "default_dispatch_poll_ms")]
	pub dispatch_poll_ms: u64,
	/// Lifetime of a position lease in milliseconds.
	#[serde(default = "default_lease_timeout_ms")]
	pub lease_timeout_ms: u64,
	/// Fixed settle delay after a suspend. Unset waits for the worker to park instead.
	#[serde(default)]
	pub settle_delay_ms: Option<u64>,
	/// Force the gate clear after it has been busy this long. Unset waits forever.
	#[serde(default)]
	pub stuck_gate_reset_ms: Option<u64>,
	/// Busy polls between watchdog warnings. Zero disables the watchdog.
	#[serde(default = "default_watchdog_polls")]
	pub watchdog_polls: u32,
}

fn default_tick_interval_ms() -> u64 {
	20
}

fn default_dispatch_poll_ms() -> u64 {
	20
}

fn default_lease_timeout_ms() -> u64 {
	1000
}

fn default_watchdog_polls() -> u32 {
	50
}

impl Default for CoreConfig {
	fn default() -> Self {
		Self {
			tick_interval_ms: default_tick_interval_ms(),
			dispatch_poll_ms: default_dispatch_poll_ms(),
			lease_timeout_ms: default_lease_timeout_ms(),
			settle_delay_ms: None,
			stuck_gate_reset_ms: None,
			watchdog_polls: default_watchdog_polls(),
		}
	}
}

impl CoreConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses and validates a TOML file.
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&content)
	}

	/// Rejects zero intervals that would turn waits into busy loops.
	pub fn validate(&self) -> Result<()> {
		let nonzero = [
			("tick_interval_ms", self.tick_interval_ms),
			("dispatch_poll_ms", self.dispatch_poll_ms),
			("lease_timeout_ms", self.lease_timeout_ms),
			("stuck_gate_reset_ms", self.stuck_gate_reset_ms.unwrap_or(1)),
		];
		match nonzero.into_iter().find(|(_, value)| *value == 0) {
			Some((field, _)) => Err(ConfigError::ZeroInterval(field)),
			None => Ok(()),
		}
	}

	pub fn tick_interval(&self) -> Duration {
		Duration::from_millis(self.tick_interval_ms)
	}

	pub fn dispatch_poll(&self) -> Duration {
		Duration::from_millis(self.dispatch_poll_ms)
	}

	pub fn lease_timeout(&self) -> Duration {
		Duration::from_millis(self.lease_timeout_ms)
	}

	pub fn settle_policy(&self) -> SettlePolicy {
		match self.settle_delay_ms {
			Some(ms) => SettlePolicy::FixedDelay(Duration::from_millis(ms)),
			None => SettlePolicy::Acknowledged,
		}
	}

	pub fn stuck_gate_policy(&self) -> Arc<dyn StuckGatePolicy> {
		match self.stuck_gate_reset_ms {
			Some(ms) => Arc::new(ResetAfter(Duration::from_millis(ms))),
			None => Arc::new(WaitForever),
		}
	}

	pub fn gate_wait_spec(&self) -> GateWaitSpec {
		GateWaitSpec {
			poll: self.dispatch_poll(),
			watchdog_polls: self.watchdog_polls,
			policy: self.stuck_gate_policy(),
		}
	}
}
