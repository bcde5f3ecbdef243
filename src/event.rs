//! The generic relay event and the typed views the resolver pulls out
//! of it for each of the four kinds it consumes (C3/C5 data model).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

pub const KIND_ENTRYPOINT: u64 = 11126;
pub const KIND_SITE_INDEX: u64 = 31126;
pub const KIND_MANIFEST: u64 = 1126;
pub const KIND_ASSET: u64 = 1125;

/// A relay event, treated as opaque-but-typed: every payload the pool
/// hands back deserializes into this shape regardless of kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NwebEvent {
    pub id: String,
    pub pubkey: String,
    pub kind: u64,
    pub created_at: i64,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl NwebEvent {
    /// The value of the first tag named `name`, e.g. `["a", "..."]`
    /// returns `Some("...")` for `name == "a"`.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(|s| s.as_str()) == Some(name))
            .and_then(|t| t.get(1))
            .map(|s| s.as_str())
    }

    /// All tags named `name`, e.g. every `["e", id, hint?]`.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Vec<String>> {
        self.tags
            .iter()
            .filter(move |t| t.first().map(|s| s.as_str()) == Some(name))
    }
}

/// Kind 11126: replaceable, points at the current site index via its
/// `a`-tag `"31126:<pubkey>:<d>"`.
pub struct Entrypoint<'a> {
    pub event: &'a NwebEvent,
    pub d_tag: String,
}

impl<'a> Entrypoint<'a> {
    pub fn parse(event: &'a NwebEvent) -> Result<Self, Error> {
        let a_tag = event
            .first_tag_value("a")
            .ok_or_else(|| Error::BadEntrypoint("missing a-tag".to_string()))?;

        let mut parts = a_tag.splitn(3, ':');
        let kind = parts
            .next()
            .ok_or_else(|| Error::BadEntrypoint("a-tag has no kind segment".to_string()))?;
        let pubkey = parts
            .next()
            .ok_or_else(|| Error::BadEntrypoint("a-tag has no pubkey segment".to_string()))?;
        let d_tag = parts
            .next()
            .ok_or_else(|| Error::BadEntrypoint("a-tag has no d-tag segment".to_string()))?;

        if kind != "31126" {
            return Err(Error::BadEntrypoint(format!(
                "a-tag points at kind {kind}, want 31126"
            )));
        }
        if pubkey != event.pubkey {
            return Err(Error::BadEntrypoint(
                "a-tag pubkey does not match entrypoint author".to_string(),
            ));
        }
        if d_tag.is_empty() {
            return Err(Error::BadEntrypoint("a-tag has empty d-tag".to_string()));
        }

        Ok(Entrypoint {
            event,
            d_tag: d_tag.to_string(),
        })
    }
}

/// Kind 31126 `content`: `{ routes: { "/path": manifestId }, version?,
/// defaultRoute?, notFoundRoute? }`.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteIndexContent {
    pub routes: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default, rename = "defaultRoute")]
    pub default_route: Option<String>,
    #[serde(default, rename = "notFoundRoute")]
    pub not_found_route: Option<String>,
}

pub struct SiteIndex<'a> {
    pub event: &'a NwebEvent,
    pub content: SiteIndexContent,
}

impl<'a> SiteIndex<'a> {
    pub fn parse(event: &'a NwebEvent) -> Result<Self, Error> {
        let content: SiteIndexContent = serde_json::from_str(&event.content)
            .map_err(|e| Error::NotPublished(format!("site index content malformed: {e}")))?;
        Ok(SiteIndex { event, content })
    }

    pub fn manifest_id_for(&self, route: &str) -> Option<&str> {
        self.content.routes.get(route).map(|s| s.as_str())
    }

    pub fn available_routes(&self) -> Vec<String> {
        self.content.routes.keys().cloned().collect()
    }
}

/// Kind 1126 `content`: `{ csp?: { directive: [source,...] }, title?, ...}`.
pub struct Manifest<'a> {
    pub event: &'a NwebEvent,
    pub meta: Value,
}

impl<'a> Manifest<'a> {
    pub fn parse(event: &'a NwebEvent) -> Result<Self, Error> {
        let meta: Value = serde_json::from_str(&event.content)
            .map_err(|e| Error::ManifestMissing(format!("manifest content malformed: {e}")))?;
        Ok(Manifest { event, meta })
    }

    /// Asset event ids referenced by `["e", <id>, <hint?>]` tags, in
    /// manifest order.
    pub fn asset_ids(&self) -> Vec<String> {
        self.event
            .tags_named("e")
            .filter_map(|t| t.get(1).cloned())
            .collect()
    }
}

/// The MIME-bucketed outcome of fetching a manifest's assets.
pub struct CategorizedAssets<'a> {
    pub html: &'a NwebEvent,
    pub css: Vec<&'a NwebEvent>,
    pub js: Vec<&'a NwebEvent>,
    pub other: Vec<&'a NwebEvent>,
}

pub fn asset_mime(event: &NwebEvent) -> Option<&str> {
    event.first_tag_value("m")
}

pub fn asset_sha256_tag(event: &NwebEvent) -> Option<&str> {
    event.first_tag_value("x")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(id: &str, pubkey: &str, kind: u64, tags: Vec<Vec<&str>>, content: &str) -> NwebEvent {
        NwebEvent {
            id: id.to_string(),
            pubkey: pubkey.to_string(),
            kind,
            created_at: 0,
            tags: tags
                .into_iter()
                .map(|t| t.into_iter().map(|s| s.to_string()).collect())
                .collect(),
            content: content.to_string(),
        }
    }

    #[test]
    fn entrypoint_parses_valid_a_tag() {
        let e = ev(
            "e1",
            "pk1",
            11126,
            vec![vec!["a", "31126:pk1:siteDtag"]],
            "",
        );
        let entry = Entrypoint::parse(&e).unwrap();
        assert_eq!(entry.d_tag, "siteDtag");
    }

    #[test]
    fn entrypoint_rejects_wrong_kind() {
        let e = ev("e1", "pk1", 11126, vec![vec!["a", "1:pk1:d"]], "");
        assert!(matches!(
            Entrypoint::parse(&e),
            Err(Error::BadEntrypoint(_))
        ));
    }

    #[test]
    fn entrypoint_rejects_empty_d_tag() {
        let e = ev("e1", "pk1", 11126, vec![vec!["a", "31126:pk1:"]], "");
        assert!(Entrypoint::parse(&e).is_err());
    }

    #[test]
    fn site_index_parses_routes() {
        let e = ev(
            "si1",
            "pk1",
            31126,
            vec![],
            r#"{"routes":{"/":"MAN1"}}"#,
        );
        let idx = SiteIndex::parse(&e).unwrap();
        assert_eq!(idx.manifest_id_for("/"), Some("MAN1"));
        assert_eq!(idx.manifest_id_for("/x"), None);
    }

    #[test]
    fn manifest_collects_asset_ids_in_order() {
        let e = ev(
            "man1",
            "pk1",
            1126,
            vec![vec!["e", "ASSETH"], vec!["e", "ASSETC"]],
            "{}",
        );
        let m = Manifest::parse(&e).unwrap();
        assert_eq!(m.asset_ids(), vec!["ASSETH", "ASSETC"]);
    }
}
