use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use pipefire_domain::TaskDefinition;

/// The top-level document a host loads at startup (spec.md §6). It names
/// pipelines but does not define them: `pipelines` maps a pipeline name to
/// the path (relative to this file's directory) of that pipeline's own
/// JSON/YAML/TOML definition, mirroring `internal/config.HostConfig` plus
/// the `pluginDir` key spec.md §6 names but the Go struct omits.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_loglevel")]
    pub loglevel: String,
    #[serde(default)]
    pub background: bool,
    pub plugin_dir: Option<PathBuf>,
    pub pipelines: HashMap<String, PathBuf>,
}

fn default_loglevel() -> String {
    "information".to_string()
}

/// One pipeline's own definition, loaded from the file `HostConfig.pipelines`
/// points at: its database, its bus connection and topology, and its
/// ordered task list (spec.md §6). The map key a `HostConfig` stores this
/// under is both the plugin-registry lookup key (spec.md §9) and the name
/// stamped onto every `RunContext` this pipeline creates.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineDefinition {
    /// Which compiled-in implementation the plugin registry (spec.md §9)
    /// should build this pipeline from. Every pipeline this daemon ships
    /// currently wants `"generic"` — a task list driven straight through
    /// the executor with no pipeline-specific behavior — so this defaults
    /// to it and a definition rarely needs to set it explicitly.
    #[serde(default = "default_plugin")]
    pub plugin: String,
    pub database: DatabaseConfig,
    pub rabbitmq: BusConfig,
    pub tasks: Vec<TaskDefinition>,
}

fn default_plugin() -> String {
    "generic".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    #[serde(default)]
    pub sslmode: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_db_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        let sslmode = self.sslmode.as_deref().unwrap_or("prefer");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.username, self.password, self.host, self.port, self.database, sslmode
        )
    }
}

/// Mirrors `original_source/pipelines/directdebit/mq.go`'s `BusConfig`:
/// connection fields plus the exchange/queue topology to declare
/// idempotently on every connect (spec.md §4.7).
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    #[serde(default = "default_amqp_port")]
    pub port: u16,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    #[serde(default)]
    pub exchanges: Vec<ExchangeConfig>,
    pub queues: Vec<QueueConfig>,
}

fn default_amqp_port() -> u16 {
    5672
}

fn default_vhost() -> String {
    "/".to_string()
}

impl BusConfig {
    pub fn amqp_url(&self) -> String {
        let vhost = self.vhost.trim_start_matches('/');
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, vhost
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(default = "default_exchange_kind")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub durable: bool,
}

fn default_exchange_kind() -> String {
    "topic".to_string()
}

/// A queue to declare plus the bindings that attach it to an exchange.
/// Declared idempotently; the first entry in `BusConfig.queues` is the one
/// the listener subscribes to with manual acknowledgement (spec.md §4.7).
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct BindingConfig {
    pub exchange: String,
    pub routing_key: String,
}
