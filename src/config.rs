use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    /// Origin the bridge itself is served from; never trusted.
    pub self_origin: String,
    /// Substrings an inbound origin must contain to be trusted.
    pub allowed_origins: Vec<String>,
    /// False when the bridge has no parent frame (nothing to handshake with).
    #[serde(default = "default_embedded")]
    pub embedded: bool,
    #[serde(default = "default_handshake_interval_ms")]
    pub handshake_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Frames are relayed through stdin/stdout.
    #[default]
    Stdio,
    /// The bridge connects to a relay and exchanges frames over TCP.
    Tcp { host: String, port: u16 },
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Fixed working directory. When absent, a temporary directory is
    /// created at boot and removed at teardown.
    /// Supports ${ENV_VAR} substitution
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default = "default_package_manager")]
    pub package_manager: String,
    #[serde(default = "default_install_args")]
    pub install_args: Vec<String>,
    /// Script used when the manifest declares none of dev/start/serve.
    #[serde(default = "default_script")]
    pub default_script: String,
    /// How long to keep reading output after a process exits.
    #[serde(default = "default_output_drain_ms")]
    pub output_drain_ms: u64,
    /// Extra environment for every spawned process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workdir: None,
            package_manager: default_package_manager(),
            install_args: default_install_args(),
            default_script: default_script(),
            output_drain_ms: default_output_drain_ms(),
            env: BTreeMap::new(),
        }
    }
}

fn default_embedded() -> bool {
    true
}

fn default_handshake_interval_ms() -> u64 {
    1000
}

fn default_package_manager() -> String {
    "npm".to_string()
}

fn default_install_args() -> Vec<String> {
    vec!["install".to_string()]
}

fn default_script() -> String {
    "start".to_string()
}

fn default_output_drain_ms() -> u64 {
    250
}

impl TransportConfig {
    /// Human-readable description of the transport
    pub fn mode_description(&self) -> String {
        match self {
            TransportConfig::Stdio => "stdio".to_string(),
            TransportConfig::Tcp { host, port } => format!("tcp ({host}:{port})"),
        }
    }
}

impl SandboxConfig {
    pub fn output_drain(&self) -> Duration {
        Duration::from_millis(self.output_drain_ms)
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses TOML after expanding environment variables like ${SANDBOX_DIR}
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.bridge.self_origin.trim().is_empty() {
            bail!("bridge.self_origin must not be empty");
        }
        // An empty pattern is contained in every origin
        if self.bridge.allowed_origins.iter().any(|p| p.is_empty()) {
            bail!("bridge.allowed_origins must not contain empty entries");
        }
        if self.bridge.handshake_interval_ms == 0 {
            bail!("bridge.handshake_interval_ms must be greater than zero");
        }
        if self.sandbox.package_manager.trim().is_empty() {
            bail!("sandbox.package_manager must not be empty");
        }
        Ok(())
    }

    pub fn handshake_interval(&self) -> Duration {
        Duration::from_millis(self.bridge.handshake_interval_ms)
    }
}

/// Config used across unit tests: not embedded, so no handshake timer runs.
#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        bridge: BridgeConfig {
            self_origin: "https://bridge.local".to_string(),
            allowed_origins: vec!["parent.example.com".to_string(), "localhost".to_string()],
            embedded: false,
            handshake_interval_ms: 1000,
        },
        transport: TransportConfig::Stdio,
        sandbox: SandboxConfig::default(),
    }
}
