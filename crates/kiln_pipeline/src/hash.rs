//! Dependency fingerprints.

use kiln_common::{ContentHash, ContentHasher};

use crate::asset::DependencyKind;
use crate::graph::AssetNode;

/// Global version of the fingerprint layout. Bumping it invalidates every
/// recorded fingerprint.
pub const PIPELINE_FORMAT_VERSION: u32 = 1;

const TAG_EMBEDDED: u8 = 1;
const TAG_FILE: u8 = 2;
const TAG_HARD: u8 = 3;
const TAG_SOFT: u8 = 4;

/// Computes the fingerprint of `node`.
///
/// `dependency_hashes` holds the fingerprints of the node's hard
/// dependencies in declaration order, and `file_hashes` the content hashes of
/// its declared files in declaration order. Soft dependencies contribute only
/// their GUID, since their fingerprints may depend on this node.
///
/// The result depends on nothing else: no timestamps, no paths beyond those
/// declared, no process state.
pub fn compute_asset_hash(
    node: &AssetNode,
    pipeline_version: u32,
    dependency_hashes: &[ContentHash],
    file_hashes: &[ContentHash],
) -> ContentHash {
    let mut hasher = ContentHasher::new();
    hasher
        .write_u32(PIPELINE_FORMAT_VERSION)
        .write_u32(pipeline_version)
        .write_str(&node.asset.asset_type)
        .write_hash(&ContentHash::from_bytes(&node.asset.payload));

    for embedded in &node.embedded {
        hasher
            .write_tag(TAG_EMBEDDED)
            .write_str(&embedded.asset_type)
            .write_bytes(&embedded.payload);
    }

    for (path, hash) in node.files.iter().zip(file_hashes) {
        hasher
            .write_tag(TAG_FILE)
            .write_str(&path.to_string_lossy())
            .write_hash(hash);
    }

    let hard = node
        .dependencies
        .iter()
        .filter(|d| d.kind == DependencyKind::Hard);
    for (dep, hash) in hard.zip(dependency_hashes) {
        hasher
            .write_tag(TAG_HARD)
            .write_bytes(dep.guid.as_bytes())
            .write_hash(hash);
    }

    let soft = node
        .dependencies
        .iter()
        .filter(|d| d.kind == DependencyKind::Soft);
    for dep in soft {
        hasher.write_tag(TAG_SOFT).write_bytes(dep.guid.as_bytes());
    }

    hasher.finish()
}
