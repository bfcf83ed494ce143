//! Per-item enrichment.
//!
//! Each item gets its `*_data` fields initialised first (identities to
//! `null`, collections to `[]`) and then filled from sub-resources. Fields
//! are resolved in a fixed order, one request at a time.

use serde_json::{Map, Value};

use super::client::BitbucketClient;
use super::error::{BitbucketError, Result, short_error_message};
use super::item::{Item, is_present};
use super::pagination::Paginator;
use super::types::{Category, TARGET_ACTIVITY_FIELDS};

pub(crate) struct Enricher<'a> {
    client: &'a BitbucketClient,
    exclude_user_data: bool,
}

impl<'a> Enricher<'a> {
    pub(crate) fn new(client: &'a BitbucketClient, exclude_user_data: bool) -> Self {
        Self {
            client,
            exclude_user_data,
        }
    }

    pub(crate) async fn enrich(&self, category: Category, item: &mut Item) -> Result<()> {
        match category {
            Category::Issue => self.enrich_issue(item).await,
            Category::PullRequest => self.enrich_pull(item).await,
        }
    }

    async fn enrich_issue(&self, issue: &mut Item) -> Result<()> {
        issue.insert("reporter_data", Value::Null);
        issue.insert("assignee_data", Value::Null);
        issue.insert("comments_data", Value::Array(Vec::new()));

        for field in ["reporter", "assignee"] {
            if let Some(user) = issue.present(field).cloned() {
                let data = self.resolve_user(&user).await?;
                issue.insert(&format!("{}_data", field), data);
            }
        }

        if has_link(issue, "comments") {
            let comments = self.comments(self.client.issue_comments(&issue.id())?).await?;
            issue.insert("comments_data", Value::Array(comments));
        }

        Ok(())
    }

    async fn enrich_pull(&self, pull: &mut Item) -> Result<()> {
        pull.insert("author_data", Value::Null);
        pull.insert("closed_by_data", Value::Null);
        pull.insert("activity_data", Value::Array(Vec::new()));
        pull.insert("review_comments_data", Value::Array(Vec::new()));
        pull.insert("commits_data", Value::Array(Vec::new()));

        let id = pull.id();

        let activity = self.activity(self.client.pull_activity(&id)?).await?;
        pull.insert("activity_data", Value::Array(activity));

        for field in ["author", "closed_by"] {
            if let Some(user) = pull.present(field).cloned() {
                let data = self.resolve_user(&user).await?;
                pull.insert(&format!("{}_data", field), data);
            }
        }

        if has_link(pull, "comments") {
            let comments = self.comments(self.client.pull_comments(&id)?).await?;
            pull.insert("review_comments_data", Value::Array(comments));
        }

        if has_link(pull, "commits") {
            let hashes = self.commit_hashes(&id).await?;
            pull.insert("commits_data", Value::Array(hashes));
        }

        Ok(())
    }

    /// Profile of an embedded user object, or `null` when it cannot or must
    /// not be looked up.
    async fn resolve_user(&self, user: &Value) -> Result<Value> {
        if self.exclude_user_data {
            return Ok(Value::Null);
        }

        let name = user
            .get("display_name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty());
        let href = user.pointer("/links/self/href").and_then(Value::as_str);

        match (name, href) {
            (Some(name), Some(href)) => self.client.user(href, name).await,
            _ => Ok(Value::Null),
        }
    }

    async fn comments(&self, mut pages: Paginator<'_>) -> Result<Vec<Value>> {
        let mut comments = Vec::new();
        while let Some(page) = pages.next_page().await? {
            for mut comment in page.values {
                let user = comment.get("user").filter(|u| is_present(u)).cloned();
                let user_data = match user {
                    Some(user) => self.resolve_user(&user).await?,
                    None => Value::Null,
                };
                if let Value::Object(map) = &mut comment {
                    map.insert("user_data".to_string(), user_data);
                }
                comments.push(comment);
            }
        }
        Ok(comments)
    }

    async fn activity(&self, mut pages: Paginator<'_>) -> Result<Vec<Value>> {
        let mut activity = Vec::new();
        while let Some(page) = pages.next_page().await? {
            activity.extend(page.values.iter().map(|entry| {
                let kept: Map<String, Value> = TARGET_ACTIVITY_FIELDS
                    .iter()
                    .filter_map(|field| {
                        entry
                            .get(*field)
                            .map(|value| (field.to_string(), value.clone()))
                    })
                    .collect();
                Value::Object(kept)
            }));
        }
        Ok(activity)
    }

    /// Commit hashes of a pull request.
    ///
    /// A permanent HTTP error ends the listing and keeps the hashes collected
    /// so far. Everything else propagates.
    async fn commit_hashes(&self, pull_id: &str) -> Result<Vec<Value>> {
        let mut pages = self.client.pull_commits(pull_id)?;
        let mut hashes = Vec::new();
        loop {
            match pages.next_page().await {
                Ok(Some(page)) => {
                    hashes.extend(page.values.iter().filter_map(|c| c.get("hash").cloned()));
                }
                Ok(None) => break,
                Err(err @ BitbucketError::Http { .. }) => {
                    tracing::warn!(
                        pull_id,
                        collected = hashes.len(),
                        "Commit listing failed, keeping partial result: {}",
                        short_error_message(&err)
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(hashes)
    }
}

fn has_link(item: &Item, link: &str) -> bool {
    item.get("links")
        .and_then(|links| links.get(link))
        .is_some()
}
