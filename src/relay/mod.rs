//! Relay pool (C4): persistent duplex connections, subscription
//! multiplexing, and the REQ filter wire type.

mod connection;
mod pool;
mod subscription;

pub use connection::RelayStatus;
pub use pool::RelayPool;
pub use subscription::SubId;

use serde::Serialize;

/// Standardizes a relay URL's format (trailing slash, scheme case) so
/// that two strings naming the same relay hash and compare equal as
/// pool/connection keys. Falls back to the original string if it
/// doesn't even parse as a URL — that's surfaced later as a connect
/// failure, not rejected here.
pub fn canonicalize_relay_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => raw.to_string(),
    }
}

/// A REQ filter, matching the wire shape in spec.md §6 exactly.
/// Unset fields are omitted from the serialized frame rather than sent
/// as `null`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "#d")]
    pub d_tag: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Filter {
    pub fn kinds(kinds: Vec<u64>) -> Self {
        Filter {
            kinds: Some(kinds),
            ..Default::default()
        }
    }

    pub fn by_ids(ids: Vec<String>) -> Self {
        Filter {
            ids: Some(ids),
            ..Default::default()
        }
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = Some(authors);
        self
    }

    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn d_tag(mut self, values: Vec<String>) -> Self {
        self.d_tag = Some(values);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_relay_url_normalizes_trailing_slash() {
        assert_eq!(
            canonicalize_relay_url("wss://relay.example"),
            canonicalize_relay_url("wss://relay.example/")
        );
    }

    #[test]
    fn canonicalize_relay_url_passes_through_unparseable_input() {
        assert_eq!(canonicalize_relay_url("not a url"), "not a url");
    }

    #[test]
    fn filter_omits_unset_fields() {
        let f = Filter::kinds(vec![1126]).d_tag(vec!["siteDtag".to_string()]);
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["kinds"], serde_json::json!([1126]));
        assert_eq!(json["#d"], serde_json::json!(["siteDtag"]));
        assert!(json.get("authors").is_none());
        assert!(json.get("limit").is_none());
    }
}
