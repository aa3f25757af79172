//! Configuration of the host runner.

use crate::youtube_api::GoogleEndpoints;
use eyre::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "youtube-studio-analytics.toml";
pub const ENV_PREFIX: &str = "YTSA_";

/// Runner configuration managed by Figment.
///
/// Sources, later ones winning: built-in defaults, the TOML file, `YTSA_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostConfig {
    /// Where config entries and application credentials are stored.
    pub data_dir: PathBuf,

    /// Default log directive, used when `RUST_LOG` is not set.
    pub log: String,

    /// A fixed OAuth callback URL registered with Google.
    ///
    /// When unset, a loopback listener on a random local port receives the redirect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<Url>,

    /// Whether to open the consent page in a browser, rather than only printing its URL.
    pub open_browser: bool,

    /// Serve every Google endpoint from this base URL instead, e.g. a local mock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_base_url: Option<Url>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            log: "info".to_string(),
            redirect_url: None,
            open_browser: true,
            google_base_url: None,
        }
    }
}

impl HostConfig {
    /// Builds a Figment over the defaults, `file` (if it exists) and the environment.
    pub fn figment(file: &Path) -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(HostConfig::default()));
        let figment = if file.is_file() {
            figment.merge(Toml::file(file))
        } else {
            figment
        };
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Loads the configuration.
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn load(file: Option<&Path>) -> eyre::Result<Self> {
        let path = match file {
            Some(path) => {
                eyre::ensure!(path.is_file(), "config file not found: {}", path.display());
                path
            }
            None => Path::new(DEFAULT_CONFIG_FILE),
        };
        Self::figment(path)
            .extract()
            .with_context(|| format!("extract configuration (file: {})", path.display()))
    }

    pub fn endpoints(&self) -> eyre::Result<GoogleEndpoints> {
        match &self.google_base_url {
            Some(base) => GoogleEndpoints::with_base_url(base.as_str())
                .with_context(|| format!("derive Google endpoints from {base}")),
            None => Ok(GoogleEndpoints::default()),
        }
    }
}
