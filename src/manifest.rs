//! The build-time route manifest.
//!
//! Clients fetch this artifact lazily on their first client-side navigation
//! to decide, per pattern, whether a data request to the server is needed at
//! all. It is a flat JSON object mapping each registered pattern to `1`
//! (has a server loader) or `0`, written under a content-hashed name for
//! cache busting.
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::ManifestError;
use crate::route::RouteTable;

pub const ROUTE_MANIFEST_PREFIX: &str = "route_manifest_";

/// 32 bytes length generic hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
struct Hash32([u8; 32]);

impl Hash32 {
    fn hash(buffer: impl AsRef<[u8]>) -> Self {
        Hash32(
            blake3::Hasher::new()
                .update(buffer.as_ref())
                .finalize()
                .into(),
        )
    }

    fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = vec![0u8; 64];

        for (i, &byte) in self.0.iter().enumerate() {
            acc[i * 2] = HEX[(byte >> 4) as usize];
            acc[i * 2 + 1] = HEX[(byte & 0xF) as usize];
        }

        String::from_utf8(acc).unwrap()
    }
}

impl Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Pattern → `1`/`0` flags for every registered route.
pub fn route_manifest(table: &RouteTable) -> BTreeMap<String, u8> {
    table
        .patterns()
        .map(|pattern| (pattern.to_string(), u8::from(table.has_loader(pattern))))
        .collect()
}

/// Serialize the manifest into `dir` and return the written path.
pub fn write_route_manifest(
    table: &RouteTable,
    dir: impl AsRef<Utf8Path>,
) -> Result<Utf8PathBuf, ManifestError> {
    let json = serde_json::to_vec(&route_manifest(table))?;

    let hash = Hash32::hash(&json).to_hex();
    let filename = format!("{ROUTE_MANIFEST_PREFIX}{}.json", &hash[..16]);

    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let path = dir.join(filename);
    fs::write(&path, &json)?;

    Ok(path)
}
