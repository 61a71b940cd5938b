//! ST-020: BLAKE3 hashing of files, resource declarations and templates.

use crate::core::error::Result;
use crate::core::template::{CfnResource, Template};

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash one resource declaration (type, properties, dependencies, policies).
/// Property keys serialize sorted, so equal declarations hash equal.
pub fn hash_resource(resource: &CfnResource) -> Result<String> {
    Ok(hash_string(&serde_json::to_string(resource)?))
}

/// Hash a whole template in its canonical JSON form.
pub fn hash_template(template: &Template) -> Result<String> {
    Ok(hash_string(&serde_json::to_string(template)?))
}
