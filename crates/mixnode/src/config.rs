// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node configuration.
//!
//! One JSON file, read once at startup into a plain record that is passed
//! to each component explicitly. Every field has a default, so a minimal
//! deployment can run from `{}` plus a key ring.

use crate::error::MixError;
use crate::timing;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub pool: PoolConfig,
    pub mail: MailConfig,
    pub keys: KeysConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Short name, as peers list us in their rings.
    pub shortname: String,
    /// Display name on outbound `From` headers.
    pub longname: String,
    /// The `Remailer-Type:` banner.
    pub version: String,
    /// Maximum framed plaintext size in kilobytes.
    pub klen: usize,
    /// Sleep between foreground loop passes.
    pub interval: String,
    /// Replay window and timestamp acceptance age, in days.
    pub idexp_days: u16,
    /// Incomplete chunk sets are purged after this age.
    pub chunkexp: String,
    /// Deny patterns: exact addresses or trailing matches like
    /// `@spam.example`.
    pub dest_block: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            shortname: "mixnode".to_string(),
            longname: "Anonymous Remailer".to_string(),
            version: "Mixmaster 0.3.2".to_string(),
            klen: 100,
            interval: "1m".to_string(),
            idexp_days: 14,
            chunkexp: "2d".to_string(),
            dest_block: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Minimum pooled messages before any are sent.
    pub size: usize,
    /// Percent of the pool drained per tick.
    pub rate: u32,
    /// Time between ticks.
    pub interval: String,
    /// Percent chance of injecting a dummy per tick.
    pub outdummy: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 45,
            rate: 65,
            interval: "15m".to_string(),
            outdummy: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// SMTP relay host.
    pub server: String,
    pub port: u16,
    /// The operator address outbound mail is sent from.
    pub address: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            port: 25,
            address: "mix@localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub secring: String,
    pub pubring: String,
    /// The published key file `remailer-key` serves.
    pub pubkey: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            secring: "keys/secring.mix".to_string(),
            pubring: "keys/pubring.mix".to_string(),
            pubkey: "keys/key.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub maildir: String,
    pub pool: String,
    /// The replay log file.
    pub idlog: String,
    /// Chunk reassembly root.
    pub chunks: String,
    pub helpfile: String,
    pub adminkey: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            maildir: "Maildir".to_string(),
            pool: "pool".to_string(),
            idlog: "idlog.bin".to_string(),
            chunks: "chunks".to_string(),
            helpfile: "etc/help.txt".to_string(),
            adminkey: "etc/adminkey.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// debug | info | warn | error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MixError> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| MixError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| MixError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MixError> {
        if self.pool.rate > 100 {
            return Err(MixError::Config(format!(
                "pool.rate {}% is not a percentage",
                self.pool.rate
            )));
        }
        if self.pool.outdummy > 100 {
            return Err(MixError::Config(format!(
                "pool.outdummy {}% is not a percentage",
                self.pool.outdummy
            )));
        }
        for (name, value) in [
            ("pool.interval", &self.pool.interval),
            ("general.interval", &self.general.interval),
            ("general.chunkexp", &self.general.chunkexp),
        ] {
            if timing::parse_interval(value).is_none() {
                return Err(MixError::Config(format!("{}: bad interval {:?}", name, value)));
            }
        }
        Ok(())
    }

    pub fn pool_interval(&self) -> Duration {
        timing::parse_interval(&self.pool.interval).unwrap_or(Duration::from_secs(900))
    }

    pub fn loop_interval(&self) -> Duration {
        timing::parse_interval(&self.general.interval).unwrap_or(Duration::from_secs(60))
    }

    pub fn chunk_expiry(&self) -> Duration {
        timing::parse_interval(&self.general.chunkexp).unwrap_or(Duration::from_secs(2 * 86_400))
    }
}
