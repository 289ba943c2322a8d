//! Config file loading.
//!
//! One YAML or JSON file carries logging, pipeline, storage and ABI
//! settings; command-line flags override individual values afterwards.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use traceledger_core::{Name, PipelineConfig, StorageConfig};

use crate::logging::LogConfig;

/// An ABI JSON file for one contract account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiSource {
    pub account: Name,
    pub path: PathBuf,
}

impl std::str::FromStr for AbiSource {
    type Err = anyhow::Error;

    /// Parses `account=path/to/abi.json`.
    fn from_str(s: &str) -> Result<Self> {
        let (account, path) = s
            .split_once('=')
            .with_context(|| format!("expected ACCOUNT=PATH, got '{s}'"))?;
        Ok(Self {
            account: account.trim().parse()?,
            path: PathBuf::from(path.trim()),
        })
    }
}

fn default_token_contracts() -> Vec<Name> {
    vec![Name::from_static("eosio.token")]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Contracts decoded with the built-in token ABI.
    #[serde(default = "default_token_contracts")]
    pub token_contracts: Vec<Name>,
    #[serde(default)]
    pub abis: Vec<AbiSource>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
            token_contracts: default_token_contracts(),
            abis: Vec::new(),
        }
    }
}

impl CliConfig {
    /// Load from a `.yaml`/`.yml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file '{}'", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        match ext {
            "yaml" | "yml" => serde_yaml::from_str(&text)
                .with_context(|| format!("parse YAML config '{}'", path.display())),
            "json" => serde_json::from_str(&text)
                .with_context(|| format!("parse JSON config '{}'", path.display())),
            other => bail!("unsupported config extension '{other}' (use .yaml, .yml or .json)"),
        }
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
