//! Key-space layout.
//!
//! | Key | Kind | Holds |
//! |-----|------|-------|
//! | `<prefix>` | sorted set | Global index |
//! | `<prefix>:<id>` | blob | Scene JSON |
//! | `<prefix>-caches` | set | Registered sub-index keys |
//! | `<prefix>-unscored` | set | Ids stored with a `NaN` score |
//! | `<prefix>-discoveries` | set | Live discovery cache keys |
//! | `<prefix>:<wfsURL>:<featureType>` | sorted set | Sub-index |
//! | `<sub-index key>-meta` | blob | Sub-index metadata |
//! | `<sub-index key>-tiles` | blob | Sub-index tile map |
//! | `<prefix><canonical query>` | blob (TTL) | Rendered discovery result |
//! | `<prefix><canonical query>-status` | blob (TTL) | Discovery build state |

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The global scored index.
    pub fn global(&self) -> &str {
        &self.prefix
    }

    pub fn scene(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }

    /// Scene id from a `<prefix>:<id>` key.
    pub fn scene_id<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())?.strip_prefix(':')
    }

    pub fn caches(&self) -> String {
        format!("{}-caches", self.prefix)
    }

    pub fn unscored(&self) -> String {
        format!("{}-unscored", self.prefix)
    }

    pub fn discoveries(&self) -> String {
        format!("{}-discoveries", self.prefix)
    }

    pub fn subindex(&self, wfs_url: &str, feature_type: &str) -> String {
        format!("{}:{}:{}", self.prefix, wfs_url, feature_type)
    }

    pub fn subindex_meta(subindex_key: &str) -> String {
        format!("{}-meta", subindex_key)
    }

    pub fn subindex_tiles(subindex_key: &str) -> String {
        format!("{}-tiles", subindex_key)
    }

    pub fn discovery(&self, canonical_query: &str) -> String {
        format!("{}{}", self.prefix, canonical_query)
    }

    pub fn discovery_status(cache_key: &str) -> String {
        format!("{}-status", cache_key)
    }
}
