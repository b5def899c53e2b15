use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use waymark_waypoints::{CoreConfig, LoopbackConfig, PeerId};

/// Top-level simulator configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
	#[serde(default)]
	pub core: CoreConfig,
	#[serde(default)]
	pub peer: PeerSection,
}

/// Loopback peer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSection {
	/// Owner stamped on created records.
	#[serde(default = "default_owner")]
	pub owner: String,
	/// Snapshot push latency in milliseconds.
	#[serde(default = "default_latency_ms")]
	pub latency_ms: u64,
}

fn default_owner() -> String {
	"sim-server".to_string()
}

fn default_latency_ms() -> u64 {
	5
}

impl Default for PeerSection {
	fn default() -> Self {
		Self {
			owner: default_owner(),
			latency_ms: default_latency_ms(),
		}
	}
}

impl PeerSection {
	pub fn loopback(&self) -> LoopbackConfig {
		LoopbackConfig {
			owner: PeerId::new(self.owner.clone()),
			latency: Duration::from_millis(self.latency_ms),
		}
	}
}

impl SimConfig {
	pub fn load(path: &Path) -> anyhow::Result<Self> {
		let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
		let config: Self = toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
		config.core.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sections_are_optional() {
		let config: SimConfig = toml::from_str("").unwrap();
		assert_eq!(config, SimConfig::default());
	}

	#[test]
	fn core_and_peer_sections_parse() {
		let config: SimConfig = toml::from_str(
			r#"
			[core]
			stuck_gate_reset_ms = 500

			[peer]
			latency_ms = 40
			"#,
		)
		.unwrap();
		assert_eq!(config.core.stuck_gate_reset_ms, Some(500));
		assert_eq!(config.peer.owner, "sim-server");
		assert_eq!(config.peer.loopback().latency, Duration::from_millis(40));
	}
}
