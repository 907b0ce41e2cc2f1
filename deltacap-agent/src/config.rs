//! Configuration for the capture agent.

use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use deltacap_core::SessionConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// What to capture and how often.
    pub capture: CaptureConfig,
    /// Pipeline tuning passed straight to the capture session.
    pub session: SessionConfig,
    /// Behaviour after the capture loop ends on its own.
    pub recovery: RecoveryConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Which frame source backs the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// DXGI Desktop Duplication (Windows only).
    #[default]
    Dxgi,
    /// Animated test pattern, available everywhere.
    Synthetic,
}

/// Screen capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    /// Target frames per second.
    pub fps: u32,
    /// Monitor index to capture (0 = primary).
    pub monitor_index: u32,
    pub source: SourceKind,
    /// Synthetic source only: report a screen change on every n-th
    /// acquisition and `Unchanged` otherwise (1 = every frame changes).
    pub change_every: u64,
}

/// Recovery after access loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Stop and re-initialize the session when the loop ends itself
    /// (desktop switch, mode change, GPU reset).
    pub reinitialize_on_access_lost: bool,
    /// Delay before each re-initialization attempt.
    pub retry_delay_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 60,
            monitor_index: 0,
            source: SourceKind::Dxgi,
            change_every: 1,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            reinitialize_on_access_lost: true,
            retry_delay_ms: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AgentConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Default configuration as pretty TOML (for `--gen-config`).
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use deltacap_core::UnchangedPolicy;

    #[test]
    fn default_config_serializes() {
        let text = AgentConfig::default_toml().unwrap();
        assert!(text.contains("[capture]"));
        assert!(text.contains("fps = 60"));
        assert!(text.contains("source = \"dxgi\""));
        assert!(text.contains("reinitialize_on_access_lost"));
    }

    #[test]
    fn roundtrip_config() {
        let text = AgentConfig::default_toml().unwrap();
        let parsed = AgentConfig::parse(&text).unwrap();
        assert_eq!(parsed.capture.width, 1920);
        assert_eq!(parsed.capture.fps, 60);
        assert_eq!(parsed.session, SessionConfig::default());
        assert_eq!(parsed.recovery.retry_delay_ms, 500);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let text = r#"
            [capture]
            fps = 30
            source = "synthetic"

            [session]
            workers = 1
            unchanged = "suppress"
        "#;
        let cfg = AgentConfig::parse(text).unwrap();
        assert_eq!(cfg.capture.fps, 30);
        assert_eq!(cfg.capture.height, 1080);
        assert_eq!(cfg.capture.source, SourceKind::Synthetic);
        assert_eq!(cfg.session.workers, 1);
        assert_eq!(cfg.session.unchanged, UnchangedPolicy::Suppress);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn idle_desktop_cadence_is_configurable() {
        let text = r#"
            [capture]
            source = "synthetic"
            change_every = 30
        "#;
        let cfg = AgentConfig::parse(text).unwrap();
        assert_eq!(cfg.capture.change_every, 30);
        assert_eq!(AgentConfig::default().capture.change_every, 1);
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("deltacap-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "[capture]\nfps = \"fast\"\n").unwrap();

        let cfg = AgentConfig::load(&path);
        assert_eq!(cfg.capture.fps, 60);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = AgentConfig::load(Path::new("/nonexistent/deltacap-agent.toml"));
        assert_eq!(cfg.capture.source, SourceKind::Dxgi);
    }
}
