//! Wire types for the Inoreader API
//!
//! Shapes mirror the remote JSON exactly; everything downstream works with
//! these decoded structs rather than raw `serde_json::Value`.

use serde::{Deserialize, Serialize};

/// Response of `GET /subscription/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionList {
    /// All subscriptions visible to the authenticated account
    #[serde(default)]
    pub subscriptions: Vec<ApiSubscription>,
}

/// One subscription as reported by the remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSubscription {
    /// Stream id, e.g. `feed/http://example.com/rss`
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub categories: Vec<ApiCategory>,
    /// Feed XML URL
    #[serde(default)]
    pub url: String,
    /// Site URL
    #[serde(default, rename = "htmlUrl")]
    pub html_url: String,
    #[serde(default, rename = "iconUrl")]
    pub icon_url: String,
}

/// Folder/label a subscription belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCategory {
    pub id: String,
    #[serde(default)]
    pub label: String,
}

/// Response of `GET /stream/contents/<streamId>`.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamContentsResponse {
    #[serde(default)]
    pub items: Vec<ArticleItem>,
    /// Opaque token to resume pagination; absent on the last page
    #[serde(default)]
    pub continuation: Option<String>,
}

/// One article item inside a stream-contents page.
#[derive(Debug, Clone, Deserialize)]
pub struct ArticleItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Publication time, epoch seconds
    #[serde(default)]
    pub published: i64,
    #[serde(default)]
    pub canonical: Vec<ItemLink>,
    #[serde(default)]
    pub alternate: Vec<ItemLink>,
    #[serde(default)]
    pub summary: Option<ItemContent>,
    #[serde(default)]
    pub origin: Option<ItemOrigin>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub author: Option<String>,
}

impl ArticleItem {
    /// Canonical article URL: `canonical[0].href`, falling back to
    /// `alternate[0].href`.
    #[must_use]
    pub fn canonical_url(&self) -> Option<&str> {
        self.canonical
            .first()
            .or_else(|| self.alternate.first())
            .map(|l| l.href.as_str())
    }

    /// HTML content of the item, if the remote sent any.
    #[must_use]
    pub fn content_html(&self) -> &str {
        self.summary.as_ref().map(|s| s.content.as_str()).unwrap_or("")
    }
}

/// A link entry (`canonical` / `alternate`).
#[derive(Debug, Clone, Deserialize)]
pub struct ItemLink {
    pub href: String,
}

/// HTML-bearing item body.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemContent {
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub content: String,
}

/// Originating stream of an item.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemOrigin {
    #[serde(rename = "streamId")]
    pub stream_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "htmlUrl")]
    pub html_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_subscription_list() {
        let body = r#"{
            "subscriptions": [
                {
                    "id": "feed/http://example.com/rss",
                    "title": "Example",
                    "categories": [{"id": "user/1/label/Tech", "label": "Tech"}],
                    "url": "http://example.com/rss",
                    "htmlUrl": "http://example.com",
                    "iconUrl": ""
                }
            ]
        }"#;
        let list: SubscriptionList = serde_json::from_str(body).unwrap();
        assert_eq!(list.subscriptions.len(), 1);
        assert_eq!(list.subscriptions[0].html_url, "http://example.com");
        assert_eq!(list.subscriptions[0].categories[0].label, "Tech");
    }

    #[test]
    fn test_canonical_url_prefers_canonical() {
        let body = r#"{
            "id": "tag:google.com,2005:reader/item/1",
            "title": "t",
            "published": 1700000000,
            "canonical": [{"href": "http://example.com/a"}],
            "alternate": [{"href": "http://example.com/b"}]
        }"#;
        let item: ArticleItem = serde_json::from_str(body).unwrap();
        assert_eq!(item.canonical_url(), Some("http://example.com/a"));
    }

    #[test]
    fn test_canonical_url_falls_back_to_alternate() {
        let body = r#"{
            "id": "i",
            "alternate": [{"href": "http://example.com/b"}]
        }"#;
        let item: ArticleItem = serde_json::from_str(body).unwrap();
        assert_eq!(item.canonical_url(), Some("http://example.com/b"));
    }

    #[test]
    fn test_stream_contents_without_continuation() {
        let body = r#"{"items": []}"#;
        let page: StreamContentsResponse = serde_json::from_str(body).unwrap();
        assert!(page.items.is_empty());
        assert!(page.continuation.is_none());
    }
}
