//! Trawler - an incremental harvester for Bitbucket issues and pull requests.
//!
//! Given a repository and a time window, trawler pages through the issue or
//! pull request listing, enriches every item with its comments, activity,
//! commits and user profiles, and hands the items back one at a time.
//!
//! Requests are retried on connection failures and transient statuses, wait
//! for the rate-limit window when the quota runs low, and carry an access
//! token obtained once from an OAuth refresh token.
//!
//! # Example
//!
//! ```ignore
//! use trawler::bitbucket::{Bitbucket, Category, FetchOptions};
//! use trawler::config::BitbucketConfig;
//!
//! let backend = Bitbucket::from_config(&config).await?;
//! let options = FetchOptions::new(Category::Issue).from_date(since);
//! let mut items = backend.fetch(&options)?;
//! while let Some(item) = items.try_next().await? {
//!     index(backend.to_record(item));
//! }
//! ```

pub mod bitbucket;
pub mod config;
pub mod http;
pub mod rate_limit;
pub mod retry;
pub mod users;

pub use bitbucket::{
    Bitbucket, BitbucketClient, BitbucketError, Category, FetchOptions, Item, ItemStream, Record,
};
pub use config::BitbucketConfig;
pub use http::{HttpError, HttpMethod, HttpRequest, HttpResponse, HttpTransport};
pub use rate_limit::{RateLimitExtractor, RateLimitTracker};
pub use users::UserCache;
