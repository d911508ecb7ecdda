//! Service-updates news feed.
//!
//! The operator publishes disruption notices as a JSON array mirrored from
//! their Twitter account. Entries are best-effort: anything without a body
//! or with an unreadable timestamp is dropped.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use super::bustracker::BusTrackerError;

/// Twitter's classic timestamp layout, e.g. "Mon Aug 17 16:04:01 +0000 2026".
const FEED_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

#[derive(Debug, Clone)]
pub struct NewsItem {
    pub body: String,
    pub posted_at: DateTime<Utc>,
    pub sender: String,
    pub account: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNewsItem {
    body: Option<String>,
    date: Option<String>,
    name: Option<String>,
    account: Option<String>,
}

/// Fetch and parse the service-updates feed, newest first.
pub async fn fetch_service_updates(
    client: &reqwest::Client,
    feed_url: &str,
) -> Result<Vec<NewsItem>, BusTrackerError> {
    let response = client
        .get(feed_url)
        .send()
        .await
        .map_err(BusTrackerError::from_reqwest)?;
    let status = response.status();
    if !status.is_success() {
        return Err(BusTrackerError::HttpStatus(status.as_u16()));
    }
    let body = response
        .text()
        .await
        .map_err(BusTrackerError::from_reqwest)?;
    parse_feed(&body)
}

fn parse_feed(raw: &str) -> Result<Vec<NewsItem>, BusTrackerError> {
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(raw).map_err(|e| BusTrackerError::MalformedResponse(e.to_string()))?;

    let mut items = Vec::new();
    let mut skipped = 0usize;

    for entry in entries {
        let raw_item: RawNewsItem = match serde_json::from_value(entry) {
            Ok(item) => item,
            Err(e) => {
                debug!(error = %e, "Skipping malformed news entry");
                skipped += 1;
                continue;
            }
        };

        let Some(body) = raw_item.body.filter(|b| !b.is_empty()) else {
            skipped += 1;
            continue;
        };
        let Some(posted_at) = raw_item.date.as_deref().and_then(parse_feed_date) else {
            skipped += 1;
            continue;
        };

        items.push(NewsItem {
            body,
            posted_at,
            sender: raw_item.name.unwrap_or_default(),
            account: raw_item.account,
        });
    }

    if skipped > 0 {
        warn!(skipped, "Skipped unreadable news entries");
    }

    items.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
    Ok(items)
}

fn parse_feed_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value, FEED_DATE_FORMAT)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}
