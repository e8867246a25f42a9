//! Engine configuration
//!
//! Settings are layered: [`EngineConfig::default`], then an optional JSON file
//! ([`load_config`]), then the document's engine endpoint
//! ([`EngineConfig::apply_document`]), then whatever the embedding program sets
//! directly. Durations are stored in JSON as milliseconds.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{BuildError, BuildResult, ConfigError, ConfigResult};
use crate::data::{Node, NodeList, Value};
use crate::script::{ENGINE_PLUGIN, EngineDecl};

/// Configuration for an [`Engine`](super::Engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Full passes before a free run ends; `0` repeats forever
    pub repeat_count: u64,

    /// Log destination used by the CLI
    pub log_file: Option<PathBuf>,

    /// Deadline for command execution
    #[serde(with = "millis")]
    pub command_timeout: Duration,

    /// Deadline for endpoint sends
    #[serde(with = "millis")]
    pub send_timeout: Duration,

    /// Deadline for endpoint receives
    #[serde(with = "millis")]
    pub receive_timeout: Duration,

    /// Idle poll granularity of the run loop
    #[serde(with = "millis")]
    pub poll_interval: Duration,

    /// Number of step reports retained
    pub history_limit: usize,

    /// Parameters for `${...}` expansion
    pub variables: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            repeat_count: 0,
            log_file: None,
            command_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(30),
            receive_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            history_limit: 256,
            variables: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Overlay the configuration children of the document's engine endpoint.
    ///
    /// Recognised children (case-insensitive): `RepeatCount`, `LogFile`,
    /// `CommandTimeout`, `SendTimeout`, `ReceiveTimeout`, `PollInterval`,
    /// `HistoryLimit` and a `Variables` subtree. Timeouts accept any value
    /// coercible to a duration; bare numbers are seconds.
    pub fn apply_document(&mut self, engine: &EngineDecl) -> BuildResult<()> {
        let owner = engine.name.as_str();
        for node in engine.config.visible().iter() {
            match node.name.to_ascii_lowercase().as_str() {
                "repeatcount" => self.repeat_count = count(owner, node)?,
                "historylimit" => self.history_limit = count(owner, node)? as usize,
                "logfile" => {
                    let path = node.text();
                    self.log_file = (!path.trim().is_empty()).then(|| PathBuf::from(path.trim()));
                }
                "commandtimeout" => self.command_timeout = duration(owner, node)?,
                "sendtimeout" => self.send_timeout = duration(owner, node)?,
                "receivetimeout" => self.receive_timeout = duration(owner, node)?,
                "pollinterval" => {
                    let interval = duration(owner, node)?;
                    if interval.is_zero() {
                        return Err(invalid(owner, "PollInterval must be positive"));
                    }
                    self.poll_interval = interval;
                }
                "variables" => {
                    for variable in node.children.iter() {
                        self.variables.insert(variable.name.clone(), variable.text());
                    }
                }
                _ => tracing::warn!(
                    endpoint = owner,
                    setting = %node.name,
                    "ignoring unknown engine setting"
                ),
            }
        }
        Ok(())
    }

    /// Render as the engine endpoint's declaration node.
    pub fn to_node(&self, name: &str) -> Node {
        let mut children = NodeList::new();
        children.push(Node::with_value("RepeatCount", self.repeat_count));
        if let Some(path) = &self.log_file {
            children.push(Node::with_value("LogFile", path.display().to_string()));
        }
        children.push(Node::with_value("CommandTimeout", span(self.command_timeout)));
        children.push(Node::with_value("SendTimeout", span(self.send_timeout)));
        children.push(Node::with_value("ReceiveTimeout", span(self.receive_timeout)));
        children.push(Node::with_value("PollInterval", span(self.poll_interval)));
        children.push(Node::with_value("HistoryLimit", self.history_limit as u64));
        if !self.variables.is_empty() {
            let variables = self
                .variables
                .iter()
                .map(|(key, value)| Node::with_value(key.clone(), value.as_str()))
                .collect::<NodeList>();
            children.push(Node::new("Variables").children(variables));
        }
        Node::with_value(format!("@{name}"), ENGINE_PLUGIN).children(children)
    }
}

fn span(duration: Duration) -> Value {
    TimeDelta::from_std(duration)
        .map(Value::Duration)
        .unwrap_or_default()
}

fn invalid(owner: &str, detail: impl Into<String>) -> BuildError {
    BuildError::InvalidConfiguration {
        owner: owner.to_string(),
        detail: detail.into(),
    }
}

fn count(owner: &str, node: &Node) -> BuildResult<u64> {
    node.value
        .as_u64()
        .ok_or_else(|| invalid(owner, format!("{} must be a non-negative integer", node.name)))
}

fn duration(owner: &str, node: &Node) -> BuildResult<Duration> {
    node.value
        .as_duration()
        .and_then(|span| span.to_std().ok())
        .ok_or_else(|| invalid(owner, format!("{} must be a non-negative duration", node.name)))
}

/// Write data atomically: temp file, sync, rename, then sync the parent directory.
pub fn write_atomic(path: &Path, data: &[u8]) -> ConfigResult<()> {
    let temp_path = path.with_extension("tmp");
    let failed = |detail: String| ConfigError::AtomicWriteFailed {
        path: path.to_path_buf(),
        detail,
    };

    let mut file = File::create(&temp_path)
        .map_err(|err| failed(format!("create {}: {err}", temp_path.display())))?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|err| failed(format!("rename {}: {err}", temp_path.display())))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let dir = OpenOptions::new().read(true).open(parent)?;
        dir.sync_all()?;
    }
    Ok(())
}

/// Save a configuration as pretty JSON.
pub fn write_config(path: &Path, config: &EngineConfig) -> ConfigResult<()> {
    let json = serde_json::to_vec_pretty(config)?;
    write_atomic(path, &json)
}

/// Load a configuration; missing fields take their defaults.
pub fn load_config(path: &Path) -> ConfigResult<EngineConfig> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
