use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Clone, Default, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub federation: FederationConfig,
    pub users: Vec<UserConfig>,
    pub blog: Option<BlogConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Base URL of this node, no trailing slash.
    pub base_url: String,
    /// Number of inboxes delivered per dispatch invocation.
    pub batch_size: u32,
    /// Delay between queuing an item and its first dispatch. The window in
    /// which a newer item can supersede it before any delivery happens.
    pub dispatch_delay_ms: u64,
    /// Federate both the individual user actors and the aggregate blog
    /// actor. Update and Delete fan out to the union of their followers.
    pub dual_mode: bool,
    /// Delivery error count after which a remote actor counts as faulty.
    pub faulty_threshold: u64,
}

#[derive(Clone, Default, Debug, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub id: u64,
    pub username: String,
    pub name: String,
    pub summary: Option<String>,
    pub icon: Option<String>,
}

#[derive(Clone, Default, Debug, Deserialize)]
#[serde(default)]
pub struct BlogConfig {
    pub username: String,
    pub name: String,
    pub summary: Option<String>,
    pub icon: Option<String>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            batch_size: 50,
            dispatch_delay_ms: 5_000,
            dual_mode: false,
            faulty_threshold: 5,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Validation(format!("cannot read config {path:?}: {e}")))?;
        toml::from_str(&text).map_err(|e| Error::Validation(format!("invalid config: {e}")))
    }

    /// Host part of the base URL, used to match `user@host` handles.
    pub fn host(&self) -> &str {
        let url = &self.federation.base_url;
        let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
        rest.split('/').next().unwrap_or(rest)
    }
}
