//! Bitbucket issue and pull request harvesting.
//!
//! # Module Structure
//!
//! - [`error`] - Error types for Bitbucket API operations
//! - [`oauth`] - Refresh-token exchange
//! - [`types`] - Constants, categories and date helpers
//! - [`client`] - Authenticated, retrying, rate-limit aware client
//! - [`pagination`] - Cursor pagination over `next` links
//! - [`item`] - Listing entries and their metadata
//! - [`backend`] - Fetch orchestration and enrichment
//! - [`record`] - Indexing envelope
//!
//! # Example
//!
//! ```ignore
//! use trawler::bitbucket::{Bitbucket, Category, FetchOptions};
//! use trawler::config::BitbucketConfig;
//!
//! let backend = Bitbucket::from_config(&config).await?;
//! let mut items = backend.fetch(&FetchOptions::new(Category::PullRequest))?;
//! while let Some(item) = items.try_next().await? {
//!     println!("{}", serde_json::to_string(&backend.to_record(item))?);
//! }
//! ```

mod backend;
mod client;
mod enrich;
mod error;
mod item;
mod oauth;
mod pagination;
mod record;
mod types;

pub use error::{BitbucketError, Result, short_error_message};

pub use oauth::{AccessToken, Credentials, DEFAULT_TOKEN_URL, exchange_refresh_token};

pub use types::{
    BITBUCKET_API_URL, BITBUCKET_URL, Category, MAX_CATEGORY_ITEMS_PER_PAGE, PULL_REQUEST_STATES,
    TARGET_ACTIVITY_FIELDS, default_from_date, default_to_date, parse_datetime, urijoin,
};

pub use client::BitbucketClient;

pub use pagination::{PageCursor, Paginator, RawPage};

pub use item::Item;

pub use backend::{Bitbucket, FetchOptions, ItemStream};

pub use record::{BACKEND_NAME, BACKEND_VERSION, Record, SearchFields, record_uuid};
