//! Cursor pagination over `next` links.
//!
//! Only the first URL is built locally. Every later page is requested from
//! the `next` link of the page before it, byte for byte, because the server
//! embeds the original query in that link.

use serde_json::Value;

use super::client::BitbucketClient;
use super::error::{BitbucketError, Result};

/// Position of a paginator inside one logical listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub current_url: String,
    /// Zero-based index of the page `current_url` points at.
    pub page_index: usize,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub values: Vec<Value>,
    pub next: Option<String>,
    pub page_index: usize,
}

impl RawPage {
    /// Split a page body into its `values` and `next` link.
    ///
    /// A missing or non-array `values` is treated as empty.
    pub fn from_value(body: Value, page_index: usize) -> Result<Self> {
        let Value::Object(mut map) = body else {
            return Err(BitbucketError::InvalidItem(format!(
                "page {} is not a JSON object",
                page_index
            )));
        };

        let values = match map.remove("values") {
            Some(Value::Array(values)) => values,
            _ => Vec::new(),
        };
        let next = match map.remove("next") {
            Some(Value::String(next)) if !next.is_empty() => Some(next),
            _ => None,
        };

        Ok(Self {
            values,
            next,
            page_index,
        })
    }

    /// Whether the listing continues after this page.
    pub fn has_next(&self) -> bool {
        self.next.is_some() && !self.values.is_empty()
    }
}

/// Lazy, strictly sequential page sequence.
///
/// A page is only requested when the caller asks for it. Once exhausted the
/// paginator keeps returning `None`; start over with a new one.
#[derive(Debug)]
pub struct Paginator<'a> {
    client: &'a BitbucketClient,
    cursor: Option<PageCursor>,
}

impl<'a> Paginator<'a> {
    /// Start at `url` with `query` appended.
    pub fn new(
        client: &'a BitbucketClient,
        url: &str,
        query: &[(String, String)],
    ) -> Result<Self> {
        let mut first = url::Url::parse(url)
            .map_err(|e| BitbucketError::Config(format!("invalid URL '{}': {}", url, e)))?;
        if !query.is_empty() {
            first.query_pairs_mut().extend_pairs(query);
        }

        Ok(Self {
            client,
            cursor: Some(PageCursor {
                current_url: first.into(),
                page_index: 0,
            }),
        })
    }

    /// The page the next call will request, if any.
    pub fn cursor(&self) -> Option<&PageCursor> {
        self.cursor.as_ref()
    }

    /// Fetch the next page.
    pub async fn next_page(&mut self) -> Result<Option<RawPage>> {
        let Some(cursor) = self.cursor.take() else {
            return Ok(None);
        };

        tracing::debug!(url = %cursor.current_url, page = cursor.page_index, "Fetching page");

        let body = self.client.fetch_json(&cursor.current_url).await?;
        let page = RawPage::from_value(body, cursor.page_index)?;

        if page.has_next()
            && let Some(next) = page.next.clone()
        {
            self.cursor = Some(PageCursor {
                current_url: next,
                page_index: cursor.page_index + 1,
            });
        }

        Ok(Some(page))
    }

    /// Drain every remaining page into one list of values.
    pub async fn collect_values(mut self) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        while let Some(page) = self.next_page().await? {
            values.extend(page.values);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bitbucket::AccessToken;
    use crate::config::BitbucketConfig;
    use crate::http::{HttpMethod, HttpResponse, MockTransport};
    use serde_json::json;

    const ISSUES: &str = "https://api.bitbucket.org/2.0/repositories/owner/repo/issues";

    fn client(transport: &MockTransport) -> BitbucketClient {
        let mut config = BitbucketConfig::new("owner", "repo");
        config.sleep_time = 0;
        config.max_retries = 1;
        BitbucketClient::with_token(&config, Arc::new(transport.clone()), AccessToken::new("t"))
    }

    fn values(range: std::ops::Range<u32>) -> Vec<Value> {
        range.map(|id| json!({"id": id})).collect()
    }

    #[test]
    fn raw_page_tolerates_missing_fields() {
        let page = RawPage::from_value(json!({"size": 0}), 3).unwrap();
        assert!(page.values.is_empty());
        assert_eq!(page.next, None);
        assert_eq!(page.page_index, 3);
        assert!(!page.has_next());

        let page = RawPage::from_value(json!({"values": null, "next": "x"}), 0).unwrap();
        assert!(!page.has_next(), "empty values ends the listing");

        assert!(RawPage::from_value(json!([1, 2]), 0).is_err());
    }

    #[test]
    fn first_url_carries_encoded_query() {
        let transport = MockTransport::new();
        let client = client(&transport);
        let paginator = Paginator::new(
            &client,
            ISSUES,
            &[
                ("sort".to_string(), "updated_on".to_string()),
                (
                    "q".to_string(),
                    "updated_on >= 2020-01-01T00:00:00+00:00".to_string(),
                ),
            ],
        )
        .unwrap();

        assert_eq!(
            paginator.cursor().unwrap().current_url,
            format!("{ISSUES}?sort=updated_on&q=updated_on+%3E%3D+2020-01-01T00%3A00%3A00%2B00%3A00")
        );
    }

    #[test]
    fn invalid_url_is_rejected() {
        let transport = MockTransport::new();
        let client = client(&transport);
        assert!(matches!(
            Paginator::new(&client, "not a url", &[]),
            Err(BitbucketError::Config(_))
        ));
    }

    #[tokio::test]
    async fn follows_next_links_verbatim() {
        let transport = MockTransport::new();
        let first = format!("{ISSUES}?sort=updated_on");
        let second = "https://api.bitbucket.org/2.0/repositories/owner/repo/issues?page=2&sort=updated_on&opaque=x%20y";
        transport.push_json(first.clone(), 200, json!({"values": values(0..2), "next": second}));
        transport.push_json(second, 200, json!({"values": values(2..3)}));

        let client = client(&transport);
        let mut paginator = Paginator::new(
            &client,
            ISSUES,
            &[("sort".to_string(), "updated_on".to_string())],
        )
        .unwrap();

        let page = paginator.next_page().await.unwrap().unwrap();
        assert_eq!(page.values.len(), 2);
        assert_eq!(transport.requests().len(), 1, "no read-ahead");
        assert_eq!(paginator.cursor().unwrap().current_url, second);
        assert_eq!(paginator.cursor().unwrap().page_index, 1);

        let page = paginator.next_page().await.unwrap().unwrap();
        assert_eq!(page.values.len(), 1);
        assert!(paginator.next_page().await.unwrap().is_none());
        assert!(paginator.next_page().await.unwrap().is_none());

        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec![first, second.to_string()]);
    }

    #[tokio::test]
    async fn stops_on_empty_values_even_with_next() {
        let transport = MockTransport::new();
        transport.push_json(
            ISSUES,
            200,
            json!({"values": [], "next": format!("{ISSUES}?page=2")}),
        );

        let client = client(&transport);
        let values = Paginator::new(&client, ISSUES, &[])
            .unwrap()
            .collect_values()
            .await
            .unwrap();
        assert!(values.is_empty());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn permanent_error_propagates() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            ISSUES,
            HttpResponse {
                status: 404,
                headers: Vec::new(),
                body: b"not found".to_vec(),
            },
        );

        let client = client(&transport);
        let mut paginator = Paginator::new(&client, ISSUES, &[]).unwrap();
        let err = paginator.next_page().await.expect_err("404");
        assert_eq!(err.status(), Some(404));
    }
}
