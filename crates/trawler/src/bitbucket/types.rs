//! Bitbucket constants, categories and small value helpers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Public Bitbucket site, used to build item origins.
pub const BITBUCKET_URL: &str = "https://bitbucket.org/";

/// Public Bitbucket REST API root.
pub const BITBUCKET_API_URL: &str = "https://api.bitbucket.org/2.0";

/// Default page size requested for issue and pull request listings.
pub const MAX_CATEGORY_ITEMS_PER_PAGE: u32 = 100;

/// Pull request states requested explicitly; the server omits closed ones by default.
pub const PULL_REQUEST_STATES: [&str; 4] = ["MERGED", "OPEN", "DECLINED", "SUPERSEDED"];

/// Activity entry fields kept on `activity_data`.
pub const TARGET_ACTIVITY_FIELDS: [&str; 2] = ["update", "approval"];

/// Kind of item harvested from a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Issue,
    PullRequest,
}

impl Category {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Issue => "issue",
            Category::PullRequest => "pull_request",
        }
    }

    /// Derive the category from an item's `type` discriminator.
    ///
    /// `"pullrequest"` is a pull request; anything else is an issue.
    #[must_use]
    pub fn from_type_field(kind: Option<&str>) -> Self {
        match kind {
            Some("pullrequest") => Category::PullRequest,
            _ => Category::Issue,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "issue" | "issues" => Ok(Category::Issue),
            "pull_request" | "pull_requests" | "pullrequest" => Ok(Category::PullRequest),
            other => Err(format!(
                "unknown category '{}': expected 'issue' or 'pull_request'",
                other
            )),
        }
    }
}

/// Join URL segments with single slashes.
pub fn urijoin(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Lower bound used when the caller gives no start date.
pub fn default_from_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Upper bound used when the caller gives no end date.
pub fn default_to_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Parse an API timestamp into UTC.
///
/// Accepts RFC 3339 (what Bitbucket returns), plus naive date-times and bare
/// dates which are taken as UTC.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
