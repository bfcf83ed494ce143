//! Fetch orchestration: listing, date cutoff and enrichment.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::BitbucketConfig;

use super::client::BitbucketClient;
use super::enrich::Enricher;
use super::error::Result;
use super::item::Item;
use super::pagination::Paginator;
use super::record::{Record, SearchFields};
use super::types::{Category, default_from_date, default_to_date};

/// Parameters of one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub category: Category,
    /// Lower bound on `updated_on`, applied by the server.
    pub from_date: Option<DateTime<Utc>>,
    /// Upper bound on `updated_on`, inclusive.
    pub to_date: Option<DateTime<Utc>>,
    pub exclude_user_data: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            category: Category::Issue,
            from_date: None,
            to_date: None,
            exclude_user_data: false,
        }
    }
}

impl FetchOptions {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_date(mut self, from_date: DateTime<Utc>) -> Self {
        self.from_date = Some(from_date);
        self
    }

    #[must_use]
    pub fn to_date(mut self, to_date: DateTime<Utc>) -> Self {
        self.to_date = Some(to_date);
        self
    }

    #[must_use]
    pub fn exclude_user_data(mut self, exclude: bool) -> Self {
        self.exclude_user_data = exclude;
        self
    }
}

/// Issues and pull requests of one repository.
#[derive(Debug)]
pub struct Bitbucket {
    client: BitbucketClient,
    origin: String,
    tag: String,
}

impl Bitbucket {
    pub fn new(client: BitbucketClient, config: &BitbucketConfig) -> Self {
        Self {
            client,
            origin: config.origin(),
            tag: config.tag(),
        }
    }

    /// Connect over HTTPS using `config`.
    pub async fn from_config(config: &BitbucketConfig) -> Result<Self> {
        let client = BitbucketClient::from_config(config).await?;
        Ok(Self::new(client, config))
    }

    pub fn client(&self) -> &BitbucketClient {
        &self.client
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Start a fetch. Nothing is requested until the stream is polled.
    ///
    /// Items come back in server order, which must be non-decreasing in
    /// `updated_on`: the first item past `to_date` ends the whole fetch.
    pub fn fetch(&self, options: &FetchOptions) -> Result<ItemStream<'_>> {
        let from_date = options.from_date.unwrap_or_else(default_from_date);
        let to_date = options.to_date.unwrap_or_else(default_to_date);

        if options.exclude_user_data {
            tracing::info!(
                "Excluding user data. Personal user information won't be collected from the API."
            );
        }

        tracing::info!(
            origin = %self.origin,
            category = %options.category,
            from_date = %from_date,
            to_date = %to_date,
            "Fetching items"
        );

        let pages = match options.category {
            Category::Issue => self.client.issues(Some(from_date))?,
            Category::PullRequest => self.client.pulls(Some(from_date))?,
        };

        Ok(ItemStream {
            enricher: Enricher::new(&self.client, options.exclude_user_data),
            category: options.category,
            pages,
            pending: VecDeque::new(),
            to_date,
            last_updated_on: None,
            yielded: 0,
            finished: false,
        })
    }

    pub fn search_fields(&self, item: &Item) -> SearchFields {
        SearchFields {
            item_id: item.metadata_id(),
            owner: self.client.owner().to_string(),
            repo: self.client.repository().to_string(),
        }
    }

    /// Wrap an item in its indexing envelope.
    pub fn to_record(&self, item: Item) -> Record {
        let search_fields = self.search_fields(&item);
        Record::new(item, &self.origin, &self.tag, search_fields)
    }
}

/// Pull-based sequence of enriched items.
///
/// Each call to [`ItemStream::try_next`] does only the work needed for one
/// item. Dropping the stream abandons the fetch. After an error or the date
/// cutoff the stream is finished and yields nothing more.
pub struct ItemStream<'a> {
    enricher: Enricher<'a>,
    category: Category,
    pages: Paginator<'a>,
    pending: VecDeque<Value>,
    to_date: DateTime<Utc>,
    last_updated_on: Option<DateTime<Utc>>,
    yielded: usize,
    finished: bool,
}

impl ItemStream<'_> {
    pub fn category(&self) -> Category {
        self.category
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of items yielded so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    pub async fn try_next(&mut self) -> Result<Option<Item>> {
        if self.finished {
            return Ok(None);
        }

        let next = self.advance().await;
        match &next {
            Ok(Some(_)) => self.yielded += 1,
            Ok(None) => {
                self.finished = true;
                tracing::info!(
                    category = %self.category,
                    items = self.yielded,
                    "Fetch finished"
                );
            }
            Err(_) => self.finished = true,
        }
        next
    }

    async fn advance(&mut self) -> Result<Option<Item>> {
        loop {
            let Some(raw) = self.pending.pop_front() else {
                match self.pages.next_page().await? {
                    Some(page) => {
                        self.pending.extend(page.values);
                        continue;
                    }
                    None => return Ok(None),
                }
            };

            let mut item = Item::from_value(raw)?;
            let updated_on = item.updated_on();

            if updated_on > self.to_date {
                tracing::debug!(
                    item = %item.metadata_id(),
                    to_date = %self.to_date,
                    "Item updated after to_date, stopping"
                );
                self.pending.clear();
                return Ok(None);
            }

            if let Some(last) = self.last_updated_on
                && updated_on < last
            {
                tracing::warn!(
                    item = %item.metadata_id(),
                    previous = %last,
                    "Items are not ordered by updated_on; the to_date cutoff may end the fetch early"
                );
            }
            self.last_updated_on = Some(updated_on);

            self.enricher.enrich(self.category, &mut item).await?;
            return Ok(Some(item));
        }
    }

    /// Drain the stream.
    pub async fn collect(mut self) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        while let Some(item) = self.try_next().await? {
            items.push(item);
        }
        Ok(items)
    }
}
