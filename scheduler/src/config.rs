//! Configuration for the `acine-scheduler` binary, following
//! `hypervisor::config::Config`'s `serde_yaml` + `humantime_serde` shape.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for one scheduler process: which routine to
/// serve, where its data directory lives, and how eagerly the dispatch
/// loop wakes up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding every routine's data, laid out per
    /// [`acine_core::layout`].
    pub data_dir: PathBuf,

    /// Id of the routine this process loads and serves.
    pub routine_id: String,

    /// Overrides the `RUST_LOG` environment variable when set.
    #[serde(default)]
    pub log_level: Option<String>,

    /// How long the dispatch loop sleeps between wake-ups when nothing is
    /// due.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Listen address for a future editor-protocol connection. The
    /// protocol itself is out of scope; this field only
    /// reserves the config shape so a routine's network surface is
    /// described alongside its data directory.
    #[serde(default)]
    pub editor_listen: Option<SocketAddr>,
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        serde_yaml::from_str(&text).map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let yaml = "data_dir: /var/lib/acine\nroutine_id: demo\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.routine_id, "demo");
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert!(cfg.editor_listen.is_none());
    }

    #[test]
    fn overrides_poll_interval_and_editor_listen() {
        let yaml = "data_dir: /var/lib/acine\nroutine_id: demo\npoll_interval: 1s\neditor_listen: 127.0.0.1:9000\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.editor_listen.unwrap().port(), 9000);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/acine.yaml")).unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
