//! Trawler CLI - harvest Bitbucket issues and pull requests as JSON lines.

mod config;
mod shutdown;

use std::io::Write;

use chrono::{DateTime, Utc};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use trawler::bitbucket::{Bitbucket, Category, FetchOptions, parse_datetime};
use trawler::config::BitbucketConfig;

#[derive(Debug, Parser)]
#[command(name = "trawler")]
#[command(version)]
#[command(about = "Harvest issues and pull requests from a Bitbucket repository")]
#[command(
    long_about = "Trawler pages through the issues or pull requests of a Bitbucket repository \
updated inside a time window, enriches each one with comments, activity, commits and user \
profiles, and prints one JSON record per line on stdout. Logs go to stderr."
)]
#[command(after_long_help = r#"EXAMPLES
    Issues updated since the start of 2020:
        $ trawler atlassian python-bitbucket --from-date 2020-01-01

    Pull requests, waiting out the rate limit instead of failing:
        $ trawler atlassian python-bitbucket --category pull_request --sleep-for-rate

CONFIGURATION
    Trawler reads configuration from:
      1. ~/.config/trawler/config.toml (or $XDG_CONFIG_HOME/trawler/config.toml)
      2. ./trawler.toml
      3. Environment variables (TRAWLER_* prefix, e.g., TRAWLER_CLIENT_ID)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    TRAWLER_CLIENT_ID         OAuth consumer key
    TRAWLER_SECRET_ID         OAuth consumer secret
    TRAWLER_REFRESH_TOKEN     OAuth refresh token
    RUST_LOG                  Log filter (default: trawler=info,trawler_cli=info)
"#)]
struct Cli {
    /// Bitbucket owner (user or workspace)
    owner: String,

    /// Bitbucket repository
    repository: String,

    /// Category of items to fetch (issue or pull_request)
    #[arg(long, default_value = "issue")]
    category: Category,

    /// Fetch items updated since this date (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    from_date: Option<DateTime<Utc>>,

    /// Fetch items updated until this date, inclusive
    #[arg(long, value_parser = parse_date)]
    to_date: Option<DateTime<Utc>>,

    /// Base URL of a self-hosted Bitbucket instance
    #[arg(long)]
    enterprise_url: Option<String>,

    /// Sleep until the rate limit resets instead of running it down
    #[arg(long)]
    sleep_for_rate: bool,

    /// Remaining quota at which to sleep until reset
    #[arg(long)]
    min_rate_to_sleep: Option<u64>,

    /// Maximum number of items per listing page
    #[arg(long)]
    max_items: Option<u32>,

    /// Number of retries for failed API calls
    #[arg(long)]
    max_retries: Option<usize>,

    /// Seconds to wait between retries
    #[arg(long)]
    sleep_time: Option<u64>,

    /// Accept invalid TLS certificates
    #[arg(long)]
    no_ssl_verify: bool,

    /// OAuth consumer key
    #[arg(short = 'c', long, env = "TRAWLER_CLIENT_ID")]
    client_id: Option<String>,

    /// OAuth consumer secret
    #[arg(short = 's', long, env = "TRAWLER_SECRET_ID", hide_env_values = true)]
    secret_id: Option<String>,

    /// OAuth refresh token
    #[arg(short = 'r', long, env = "TRAWLER_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    /// Do not collect personal user information
    #[arg(long)]
    filter_classified: bool,

    /// Tag attached to every record (defaults to the repository URL)
    #[arg(long)]
    tag: Option<String>,
}

impl Cli {
    /// Overlay the flags that were given on top of `config`.
    fn apply(&self, config: &mut BitbucketConfig) {
        config.owner = self.owner.clone();
        config.repository = self.repository.clone();

        if let Some(url) = &self.enterprise_url {
            config.enterprise_url = Some(url.clone());
        }
        if self.sleep_for_rate {
            config.sleep_for_rate = true;
        }
        if let Some(min) = self.min_rate_to_sleep {
            config.min_rate_to_sleep = min;
        }
        if let Some(max_items) = self.max_items {
            config.max_items = max_items;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(sleep_time) = self.sleep_time {
            config.sleep_time = sleep_time;
        }
        if self.no_ssl_verify {
            config.ssl_verify = false;
        }
        if let Some(id) = &self.client_id {
            config.client_id = Some(id.clone());
        }
        if let Some(secret) = &self.secret_id {
            config.secret_id = Some(secret.clone());
        }
        if let Some(token) = &self.refresh_token {
            config.refresh_token = Some(token.clone());
        }
        if self.filter_classified {
            config.exclude_user_data = true;
        }
        if let Some(tag) = &self.tag {
            config.tag = Some(tag.clone());
        }
    }

    fn fetch_options(&self, config: &BitbucketConfig) -> FetchOptions {
        FetchOptions {
            category: self.category,
            from_date: self.from_date,
            to_date: self.to_date,
            exclude_user_data: config.exclude_user_data,
        }
    }
}

fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    parse_datetime(value).ok_or_else(|| format!("invalid date '{}'", value))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("trawler=info,trawler_cli=info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = config::load()?;
    cli.apply(&mut config);
    let options = cli.fetch_options(&config);

    shutdown::setup_shutdown_handler();

    let backend = Bitbucket::from_config(&config).await?;
    let mut items = backend.fetch(&options)?;

    let mut out = std::io::BufWriter::new(std::io::stdout().lock());
    let mut written = 0usize;
    while let Some(item) = items.try_next().await? {
        serde_json::to_writer(&mut out, &backend.to_record(item))?;
        writeln!(out)?;
        out.flush()?;
        written += 1;

        if shutdown::is_shutdown_requested() {
            tracing::warn!(written, "Stopping early on request");
            break;
        }
    }

    tracing::info!(written, origin = backend.origin(), "Done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_minimal_invocation() {
        let cli = Cli::try_parse_from(["trawler", "acme", "widgets"]).unwrap();
        assert_eq!(cli.owner, "acme");
        assert_eq!(cli.repository, "widgets");
        assert_eq!(cli.category, Category::Issue);
        assert!(cli.from_date.is_none());
        assert!(!cli.sleep_for_rate);
    }

    #[test]
    fn parses_all_options() {
        let cli = Cli::try_parse_from([
            "trawler",
            "acme",
            "widgets",
            "--category",
            "pull_request",
            "--from-date",
            "2020-01-01",
            "--to-date",
            "2020-06-01T12:00:00+02:00",
            "--enterprise-url",
            "https://bb.example.com",
            "--sleep-for-rate",
            "--min-rate-to-sleep",
            "50",
            "--max-items",
            "20",
            "--max-retries",
            "3",
            "--sleep-time",
            "2",
            "--no-ssl-verify",
            "-c",
            "key",
            "-s",
            "secret",
            "-r",
            "refresh",
            "--filter-classified",
            "--tag",
            "test",
        ])
        .unwrap();

        assert_eq!(cli.category, Category::PullRequest);
        assert_eq!(
            cli.from_date.unwrap().to_rfc3339(),
            "2020-01-01T00:00:00+00:00"
        );
        assert_eq!(
            cli.to_date.unwrap().to_rfc3339(),
            "2020-06-01T10:00:00+00:00"
        );

        let mut config = BitbucketConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.owner, "acme");
        assert_eq!(config.enterprise_url.as_deref(), Some("https://bb.example.com"));
        assert!(config.sleep_for_rate);
        assert_eq!(config.min_rate_to_sleep, 50);
        assert_eq!(config.max_items, 20);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.sleep_time, 2);
        assert!(!config.ssl_verify);
        assert_eq!(config.client_id.as_deref(), Some("key"));
        assert!(config.exclude_user_data);
        assert_eq!(config.tag.as_deref(), Some("test"));
        assert!(config.validate().is_ok());

        let options = cli.fetch_options(&config);
        assert!(options.exclude_user_data);
        assert_eq!(options.category, Category::PullRequest);
    }

    #[test]
    fn flags_do_not_clobber_file_values() {
        let cli = Cli::try_parse_from(["trawler", "acme", "widgets"]).unwrap();
        let mut config = BitbucketConfig {
            sleep_for_rate: true,
            max_retries: 9,
            client_id: Some("from-file".to_string()),
            ..BitbucketConfig::default()
        };
        cli.apply(&mut config);
        assert!(config.sleep_for_rate);
        assert_eq!(config.max_retries, 9);
        assert_eq!(config.client_id.as_deref(), Some("from-file"));
    }

    #[test]
    fn credentials_can_come_from_the_environment() {
        let command = Cli::command();
        let env_of = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_env())
                .map(|env| env.to_string_lossy().into_owned())
        };
        assert_eq!(env_of("client_id").as_deref(), Some("TRAWLER_CLIENT_ID"));
        assert_eq!(env_of("secret_id").as_deref(), Some("TRAWLER_SECRET_ID"));
        assert_eq!(env_of("refresh_token").as_deref(), Some("TRAWLER_REFRESH_TOKEN"));
        assert_eq!(env_of("owner"), None);
    }

    #[test]
    fn rejects_unknown_category_and_bad_dates() {
        assert!(Cli::try_parse_from(["trawler", "a", "b", "--category", "commit"]).is_err());
        assert!(Cli::try_parse_from(["trawler", "a", "b", "--from-date", "soon"]).is_err());
    }
}
