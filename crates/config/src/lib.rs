//! Manages application configuration by loading settings from standard locations.
//!
//! This crate provides a unified configuration object (`Config`) that aggregates
//! settings from files and environment variables, making them accessible
//! globally via a lazily initialized static reference (`CONFIG`).
//!
//! Settings cover the local cache location, remote registries (an *ordered*
//! list, queried in declaration order), download retry behavior, and the
//! graph policies that influence binary status computation (skipping test
//! or build requirements, the build-context re-split cap, and the
//! multi-remote update policy).

use std::path::PathBuf;
use std::sync::LazyLock;

use etcetera::BaseStrategy;
use figment::providers::{Env, Format, Toml};
use figment::{Figment, Metadata, Provider};
use serde::{Deserialize, Serialize};

/// The default configuration values
const DEFAULT_TOML_CONFIG: &str = include_str!("./kiln.default.toml");

//================================================================================================
// Statics
//================================================================================================

/// Provides a lazily instantiated static reference to the application `Config`.
///
/// This static variable ensures that configuration is parsed only once from
/// canonical locations and then made immutably available throughout the
/// application's lifecycle.
pub static CONFIG: LazyLock<Config> = LazyLock::new(load_config);

//================================================================================================
// Types
//================================================================================================

/// Defines cache-related configuration settings.
#[derive(Deserialize, Serialize)]
pub struct CacheConfig {
    /// The root directory for storing cached recipes and packages.
    pub root: PathBuf,
}

/// Retry behavior for remote transfers.
#[derive(Deserialize, Serialize, Clone, Copy)]
pub struct DownloadConfig {
    /// Number of retries for transient transfer failures.
    pub retry: u32,
    /// Seconds to wait between retries.
    pub retry_wait: u64,
    /// Maximum number of recipe partitions transferred concurrently.
    pub parallel: usize,
}

/// Policies affecting graph expansion and binary status computation.
#[derive(Deserialize, Serialize, Clone, Copy)]
pub struct GraphConfig {
    /// When true, test requirements of non-root nodes are marked Skip.
    pub skip_test: bool,
    /// When true, build requirements of already-cached nodes are marked Skip.
    pub skip_build: bool,
    /// How many times the build context may re-split into its own
    /// host/build sub-graphs. The default of 1 means a tool's own tools
    /// are resolved once more and then the recursion is capped.
    pub build_resplit: u32,
}

/// How "the" latest revision is chosen across multiple remotes when
/// `--update` is in effect.
///
/// Both policies are deliberately preserved; they differ materially and
/// existing pipelines depend on each.
#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "kebab-case")]
pub enum UpdatePolicy {
    /// The newest timestamp across all consulted sources wins.
    NewestTimestamp,
    /// The first remote in configured order that has any revision wins.
    FirstMatch,
}

/// A named remote registry. Order of declaration is significant.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RemoteConfig {
    /// The remote's name, as referenced by `-r/--remote`.
    pub name: String,
    /// The remote's base URL.
    pub url: String,
}

/// Represents the application's primary configuration structure.
#[derive(Deserialize, Serialize)]
pub struct Config {
    /// Cache-related settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Transfer retry settings.
    #[serde(default)]
    pub download: DownloadConfig,
    /// Graph policies.
    #[serde(default)]
    pub graph: GraphConfig,
    /// Multi-remote update policy.
    #[serde(default = "default_update_policy")]
    pub update_policy: UpdatePolicy,
    /// Configured remotes, in query order.
    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,
}

//================================================================================================
// Impls
//================================================================================================

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: get_cache_dir(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            retry: 2,
            retry_wait: 5,
            parallel: 1,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            skip_test: true,
            skip_build: true,
            build_resplit: 1,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            download: DownloadConfig::default(),
            graph: GraphConfig::default(),
            update_policy: default_update_policy(),
            remotes: Vec::new(),
        }
    }
}

impl Config {
    /// Constructs a `Figment` instance for configuration loading.
    ///
    /// This method builds a configuration provider by layering default settings,
    /// user-specific configuration files, and environment variables.
    pub fn figment() -> Figment {
        let mut fig = Figment::from(Config::default()).merge(Toml::string(DEFAULT_TOML_CONFIG));

        if let Ok(c) = etcetera::choose_base_strategy() {
            let config = c.config_dir().join("kiln.toml");
            fig = fig.admerge(Toml::file(config));
        }

        fig.admerge(Env::prefixed("KILN_"))
    }

    /// Creates a `Config` instance from a given provider.
    pub fn from<T: Provider>(provider: T) -> Result<Config, Box<figment::Error>> {
        Figment::from(provider).extract().map_err(Box::new)
    }
}

impl Provider for Config {
    fn metadata(&self) -> figment::Metadata {
        Metadata::named("Kiln CLI Config")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        figment::providers::Serialized::defaults(self).data()
    }
}

//================================================================================================
// Functions
//================================================================================================

fn default_update_policy() -> UpdatePolicy {
    UpdatePolicy::NewestTimestamp
}

/// Determines the appropriate cache directory based on the operating system.
fn get_cache_dir() -> PathBuf {
    if let Ok(c) = etcetera::choose_base_strategy() {
        c.cache_dir().join("kiln")
    } else {
        std::env::temp_dir().join("kiln")
    }
}

/// Loads the application configuration using the default `Figment` provider.
///
/// This function is used to initialize the `CONFIG` static variable.
fn load_config() -> Config {
    Config::figment().extract().unwrap_or_else(|e| {
        tracing::error!(error = %e, "problem loading config from default sources, falling back to nearly empty configuration");
        Config::default()
    })
}
