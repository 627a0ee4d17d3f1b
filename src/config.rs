//! Configuration Module
//!
//! This module defines all configuration structures for the client.
//! Configuration is loaded from TOML files and parsed using serde.

use crate::ActorId;
use ethers::types::Address;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Main configuration structure
///
/// Contains all configuration sections for the client.
/// Loaded from a TOML file (e.g., config/default.toml).
///
/// # Example TOML
/// ```toml
/// [correlator]
/// prune_interval_ms = 1000
///
/// [correlator.eviction]
/// policy = "max_age"
/// max_age_ms = 600000
///
/// [batch]
/// reply_timeout_ms = 30000
/// finalization_timeout_ms = 60000
///
/// [api]
/// host = "127.0.0.1"
/// port = 8546
///
/// [ledger]
/// reply_delay_ms = 200
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// Reply correlator configuration
///
/// # Fields
/// - `prune_interval_ms`: How often the listener applies the eviction policy when no replies arrive
/// - `eviction`: Which buffered replies may be dropped
#[derive(Debug, Clone, Deserialize)]
pub struct CorrelatorConfig {
    #[serde(default = "default_prune_interval_ms")]
    pub prune_interval_ms: u64,
    #[serde(default)]
    pub eviction: EvictionConfig,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            prune_interval_ms: default_prune_interval_ms(),
            eviction: EvictionConfig::default(),
        }
    }
}

impl CorrelatorConfig {
    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms.max(1))
    }
}

fn default_prune_interval_ms() -> u64 {
    1_000
}

/// Reply buffer eviction policy
///
/// # Supported Policies
/// - `"retain_all"`: Keep every reply for the lifetime of the subscription
/// - `"max_age"`: Drop replies buffered longer than `max_age_ms`
/// - `"max_entries"`: Keep at most `max_entries` replies, dropping the oldest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum EvictionConfig {
    #[default]
    RetainAll,
    MaxAge { max_age_ms: u64 },
    MaxEntries { max_entries: usize },
}

/// Batch submission configuration
///
/// # Fields
/// - `reply_timeout_ms`: How long to wait for the replies of a finalized batch
/// - `finalization_timeout_ms`: How long to wait for the transaction itself to finalize
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    #[serde(default = "default_finalization_timeout_ms")]
    pub finalization_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: default_reply_timeout_ms(),
            finalization_timeout_ms: default_finalization_timeout_ms(),
        }
    }
}

impl BatchConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn finalization_timeout(&self) -> Duration {
        Duration::from_millis(self.finalization_timeout_ms)
    }

    /// Longest time a reply can sit in the buffer before its batch reads it:
    /// it may arrive right after submission, and is read at the latest when
    /// the reply deadline passes after finalization
    pub fn reply_horizon(&self) -> Duration {
        self.finalization_timeout().saturating_add(self.reply_timeout())
    }
}

fn default_reply_timeout_ms() -> u64 {
    30_000
}

fn default_finalization_timeout_ms() -> u64 {
    60_000
}

/// API server configuration
///
/// Controls the JSON-RPC API endpoint settings.
///
/// # Fields
/// - `host`: IP address to bind to (e.g., "127.0.0.1" or "0.0.0.0")
/// - `port`: TCP port to listen on (e.g., 8546)
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

/// Sandbox ledger configuration
///
/// # Fields
/// - `reply_delay_ms`: Base delay before an actor replies
/// - `reply_schedule`: `"in_order"` (first message replies first) or `"reversed"`
/// - `transaction_fee`: Fee charged per enqueued message
/// - `channel_capacity`: Reply events buffered per subscriber before it lags
/// - `accounts`: Pre-funded signer accounts
/// - `actors`: Actors deployed at startup
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_reply_delay_ms")]
    pub reply_delay_ms: u64,
    #[serde(default)]
    pub reply_schedule: ReplySchedule,
    #[serde(default)]
    pub transaction_fee: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub actors: Vec<ActorConfig>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reply_delay_ms: default_reply_delay_ms(),
            reply_schedule: ReplySchedule::default(),
            transaction_fee: 0,
            channel_capacity: default_channel_capacity(),
            accounts: Vec::new(),
            actors: Vec::new(),
        }
    }
}

fn default_reply_delay_ms() -> u64 {
    100
}

fn default_channel_capacity() -> usize {
    4_096
}

/// Order in which the sandbox answers the messages of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySchedule {
    #[default]
    InOrder,
    Reversed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub address: Address,
    pub balance: u64,
}

/// Actor deployed in the sandbox
///
/// `reason` is the panic message for `behavior = "panic"`.
#[derive(Debug, Clone, Deserialize)]
pub struct ActorConfig {
    pub id: ActorId,
    pub behavior: ActorBehavior,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorBehavior {
    /// Replies with the request payload
    Echo,
    /// Always panics
    Panic,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    /// * `Ok(Config)` if the file was successfully loaded and parsed
    /// * `Err` if the file couldn't be read or the TOML is invalid
    ///
    /// # Example
    /// ```no_run
    /// # use courier::Config;
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn load(path: &str) -> anyhow::Result<Self> {
        // Read the file contents as a string
        let content = fs::read_to_string(path)?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
