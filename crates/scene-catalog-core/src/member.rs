//! Index member encoding.
//!
//! Every scored set stores members as `<prefix>:<id>&<bbox_json>,<cloudCover>`
//! so a scan can reject on bbox overlap and cloud cover before paying for a
//! blob fetch. The bbox JSON contains commas and ids may contain `&`, so
//! decoding splits on the *last* `&` and the *last* `,`. A missing bbox is
//! encoded as `null`, a missing cloud cover as an empty string.

use crate::error::{CatalogError, Result};
use crate::keys::Keys;
use crate::models::{BBox, Feature};

/// The parts of a decoded member string.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    /// Blob key, `<prefix>:<id>`.
    pub key: String,
    pub bbox: Option<BBox>,
    pub cloud_cover: Option<f64>,
}

/// Encode a scene as an index member.
pub fn encode(keys: &Keys, feature: &Feature) -> Result<String> {
    let bbox_json = serde_json::to_string(&feature.bbox)?;
    let cloud = feature
        .cloud_cover()
        .map(|c| c.to_string())
        .unwrap_or_default();
    Ok(format!("{}&{},{}", keys.scene(&feature.id), bbox_json, cloud))
}

/// Decode an index member.
pub fn decode(member: &str) -> Result<Member> {
    let (key, rest) = member
        .rsplit_once('&')
        .ok_or_else(|| CatalogError::internal(format!("malformed index member: {}", member)))?;
    let (bbox_json, cloud) = rest
        .rsplit_once(',')
        .ok_or_else(|| CatalogError::internal(format!("malformed index member: {}", member)))?;
    let bbox: Option<BBox> = serde_json::from_str(bbox_json)
        .map_err(|e| CatalogError::internal(format!("bad bbox in member {}: {}", member, e)))?;
    let cloud_cover = if cloud.is_empty() {
        None
    } else {
        Some(
            cloud
                .parse::<f64>()
                .map_err(|_| CatalogError::internal(format!("bad cloud cover in member {}", member)))?,
        )
    };
    Ok(Member {
        key: key.to_string(),
        bbox,
        cloud_cover,
    })
}
