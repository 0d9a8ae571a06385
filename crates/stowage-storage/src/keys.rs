//! Key codec shared by storage backends.
//!
//! Maps an opaque, path-like object key to the addressing that media backends need:
//! a resource classification, the folder (directory portion) and the identifier
//! (key without its trailing extension). Every function here is total and pure;
//! upload signatures depend on these values being reproducible byte for byte.

use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FmtResult};

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg"];
const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "avi", "mov", "wmv", "flv", "webm"];

/// Coarse resource classification used to pick backend-specific handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Video,
    Raw,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Image => "image",
            ResourceType::Video => "video",
            ResourceType::Raw => "raw",
        }
    }
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Classify by declared content type. A missing content type is `Raw`.
pub fn classify(content_type: Option<&str>) -> ResourceType {
    let Some(content_type) = content_type else {
        return ResourceType::Raw;
    };
    let content_type = content_type.trim_start();

    if has_prefix_ignore_case(content_type, "image/") {
        ResourceType::Image
    } else if has_prefix_ignore_case(content_type, "video/") {
        ResourceType::Video
    } else {
        ResourceType::Raw
    }
}

/// Classify by the key's file extension, case-insensitively.
pub fn classify_by_extension(key: &str) -> ResourceType {
    let Some(ext) = extension_of(key) else {
        return ResourceType::Raw;
    };
    let ext = ext.to_ascii_lowercase();

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        ResourceType::Image
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        ResourceType::Video
    } else {
        ResourceType::Raw
    }
}

/// Classification used to address a stored key.
///
/// The declared content type wins; without one the key's extension decides, so
/// later lookups by key land on the same resource type.
pub fn classify_key(key: &str, content_type: Option<&str>) -> ResourceType {
    match content_type {
        Some(content_type) => classify(Some(content_type)),
        None => classify_by_extension(key),
    }
}

/// Directory portion of the key, or `""` when the key has no directory segment.
///
/// `"a/b/c.png"` gives `"a/b"`, `"c.png"` gives `""` and `"/c.png"` gives `"/"`.
pub fn folder_of(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    if trimmed.is_empty() {
        return if key.is_empty() { "" } else { "/" };
    }

    match trimmed.rfind('/') {
        None => "",
        Some(idx) => {
            let dir = trimmed[..idx].trim_end_matches('/');
            if dir.is_empty() {
                "/"
            } else {
                dir
            }
        }
    }
}

/// Key with its last extension removed.
///
/// Only the final `.ext` of the final path segment goes: `"a/b.tar.gz"` gives
/// `"a/b.tar"`. Keys without an extension, and dotfiles such as `".env"`, are
/// returned unchanged.
pub fn identifier_of(key: &str) -> &str {
    match extension_of(key) {
        Some(ext) => &key[..key.len() - ext.len() - 1],
        None => key,
    }
}

/// Extension of the final path segment, without the dot.
pub fn extension_of(key: &str) -> Option<&str> {
    let name = match key.rfind('/') {
        Some(idx) => &key[idx + 1..],
        None => key,
    };

    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) if idx + 1 == name.len() => None,
        Some(idx) => Some(&name[idx + 1..]),
    }
}

/// Delivery transformation applied to uploads of the given classification.
pub fn transformation_for(resource_type: ResourceType) -> Option<&'static str> {
    match resource_type {
        ResourceType::Image => Some("f_auto,q_auto"),
        ResourceType::Video | ResourceType::Raw => None,
    }
}

fn has_prefix_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
