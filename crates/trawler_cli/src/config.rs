//! Configuration file support for trawler.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `TRAWLER_`, e.g., `TRAWLER_CLIENT_ID`)
//! 3. Local config file (./trawler.toml)
//! 4. XDG config file (~/.config/trawler/config.toml)
//! 5. Built-in defaults
//!
//! Example config file:
//! ```toml
//! client_id = "..."       # or TRAWLER_CLIENT_ID
//! secret_id = "..."       # or TRAWLER_SECRET_ID
//! refresh_token = "..."   # or TRAWLER_REFRESH_TOKEN
//!
//! sleep_for_rate = true
//! min_rate_to_sleep = 20
//! max_retries = 5
//! sleep_time = 1
//! max_items = 100
//! retry_statuses = [403, 500, 502, 503]
//! # enterprise_url = "https://bitbucket.example.com"
//! ```

use std::path::{Path, PathBuf};

use config::{Config as ConfigBuilder, ConfigError, Environment, File, FileFormat};
use directories::ProjectDirs;
use trawler::config::BitbucketConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TRAWLER";

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = "trawler.toml";

/// Path of the per-user config file, if a home directory is known.
pub fn xdg_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "trawler").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from the XDG file, `./trawler.toml` and `TRAWLER_*`
/// environment variables, later sources overriding earlier ones.
pub fn load() -> Result<BitbucketConfig, ConfigError> {
    load_from(xdg_config_path().as_deref(), Path::new(LOCAL_CONFIG_FILE), ENV_PREFIX)
}

fn load_from(
    xdg_config: Option<&Path>,
    local_config: &Path,
    env_prefix: &str,
) -> Result<BitbucketConfig, ConfigError> {
    let mut builder = ConfigBuilder::builder();

    if let Some(path) = xdg_config
        && path.exists()
    {
        tracing::debug!("Loading config from {:?}", path);
        builder = builder.add_source(
            File::from(path.to_path_buf())
                .format(FileFormat::Toml)
                .required(false),
        );
    }

    if local_config.exists() {
        tracing::debug!("Loading config from {:?}", local_config);
        builder = builder.add_source(
            File::from(local_config.to_path_buf())
                .format(FileFormat::Toml)
                .required(false),
        );
    }

    // TRAWLER_CLIENT_ID -> client_id
    builder = builder.add_source(
        Environment::with_prefix(env_prefix)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("retry_statuses"),
    );

    builder.build()?.try_deserialize::<BitbucketConfig>()
}
