use std::collections::HashMap;
use std::time::Duration;

use log::warn;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::asyncop::{AsyncError, AsyncHandle};
use crate::svc::{SvcError, SystemServices};
use crate::title::{TitleId, PATCH_ID_BIT};

/// Row capacity of the OS's version-list read call. The service truncates
/// silently past this; we only get a full buffer as a hint.
pub const VERSION_LIST_CAPACITY: usize = 16384;

/// Timestamp stamped onto the empty payload when wiping the resident
/// version list. The OS treats this value specially; never substitute the
/// current time.
pub const WIPE_TIMESTAMP: u64 = 1609838100;

/// The only manifest document revision we accept.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// One row of the version table. `patch_id` addresses the title's patch
/// content (title id with the patch bit set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionEntry {
    pub patch_id: u64,
    pub version: u32,
    pub required: u32,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("version list call failed: {0}")]
    Transport(#[from] SvcError),
    #[error("version manifest fetch timed out")]
    TimedOut,
    #[error("malformed version manifest: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported manifest format version {0}")]
    FormatVersion(u32),
    #[error("manifest title id {0:?} is not a hex id")]
    TitleId(String),
}

/// Immutable snapshot of the available-version table. Replaced wholesale on
/// every refresh or fetch, never patched row by row.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<VersionEntry>,
    by_patch: HashMap<u64, usize>,
}

impl Manifest {
    pub fn from_entries(entries: Vec<VersionEntry>) -> Self {
        let mut by_patch = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            // Duplicate rows for one patch id: the last one wins.
            by_patch.insert(entry.patch_id, index);
        }
        Self { entries, by_patch }
    }

    pub fn entries(&self) -> &[VersionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest distributable version for a title, 0 when it has no row.
    pub fn available_version(&self, title: TitleId) -> u32 {
        self.by_patch
            .get(&title.patch_id())
            .map(|&index| self.entries[index].version)
            .unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
struct RemoteDoc {
    format_version: u32,
    titles: Vec<RemoteTitle>,
}

#[derive(Debug, Deserialize)]
struct RemoteTitle {
    id: String,
    version: u32,
    #[serde(default)]
    required_version: u32,
}

/// Parse the CDN manifest document. Nothing is committed on failure; the
/// caller swaps the returned snapshot in only when this succeeds.
pub fn parse_remote(data: &[u8]) -> Result<Manifest, ManifestError> {
    let doc: RemoteDoc = serde_json::from_slice(data)?;
    if doc.format_version != MANIFEST_FORMAT_VERSION {
        return Err(ManifestError::FormatVersion(doc.format_version));
    }

    let mut entries = Vec::with_capacity(doc.titles.len());
    for title in doc.titles {
        let id = u64::from_str_radix(&title.id, 16)
            .map_err(|_| ManifestError::TitleId(title.id.clone()))?;
        entries.push(VersionEntry {
            patch_id: id | PATCH_ID_BIT,
            version: title.version,
            required: title.required_version,
        });
    }
    Ok(Manifest::from_entries(entries))
}

/// Read the OS's resident version list.
pub fn load_cached<S: SystemServices>(svc: &S) -> Result<Manifest, ManifestError> {
    let rows = svc.list_version_entries(VERSION_LIST_CAPACITY)?;
    if rows.len() == VERSION_LIST_CAPACITY {
        warn!("version list filled the {VERSION_LIST_CAPACITY}-row buffer; tail rows were dropped");
    }
    Ok(Manifest::from_entries(rows))
}

/// Fetch a fresh manifest through the version-manager service, parse it,
/// and push it back into the OS cache so later cached loads see it.
pub fn fetch_remote<S: SystemServices>(
    svc: &S,
    timeout: Duration,
) -> Result<Manifest, ManifestError> {
    let handle = AsyncHandle::new(svc.request_version_data()?);
    let data = handle.finish(timeout).map_err(|err| match err {
        AsyncError::TimedOut(_) => ManifestError::TimedOut,
        AsyncError::Remote(rc) => ManifestError::Transport(rc),
    })?;

    let manifest = parse_remote(&data)?;
    let stamp = OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;
    svc.import_version_list(manifest.entries(), stamp)?;
    Ok(manifest)
}

/// Overwrite the resident version list with an empty payload. Destructive;
/// only background OS processes can repopulate it afterwards.
pub fn wipe_cached<S: SystemServices>(svc: &S) -> Result<(), ManifestError> {
    svc.import_version_list(&[], WIPE_TIMESTAMP)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(patch_id: u64, version: u32) -> VersionEntry {
        VersionEntry {
            patch_id,
            version,
            required: 0,
        }
    }

    #[test]
    fn lookup_is_by_patch_id() {
        let manifest = Manifest::from_entries(vec![entry(0x1800, 7)]);
        assert_eq!(manifest.available_version(TitleId(0x1000)), 7);
        assert_eq!(manifest.available_version(TitleId(0x2000)), 0);
    }

    #[test]
    fn duplicate_rows_last_wins() {
        let manifest = Manifest::from_entries(vec![entry(0x1800, 3), entry(0x1800, 9)]);
        assert_eq!(manifest.available_version(TitleId(0x1000)), 9);
    }

    #[test]
    fn parses_the_fixed_document_shape() {
        let doc = br#"{
            "format_version": 1,
            "titles": [
                { "id": "0100000000001000", "version": 5, "required_version": 2 },
                { "id": "0100000000002000", "version": 1 }
            ]
        }"#;
        let manifest = parse_remote(doc).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.available_version(TitleId(0x0100_0000_0000_1000)), 5);
        assert_eq!(manifest.available_version(TitleId(0x0100_0000_0000_2000)), 1);
    }

    #[test]
    fn rejects_wrong_format_version() {
        let doc = br#"{ "format_version": 2, "titles": [] }"#;
        match parse_remote(doc) {
            Err(ManifestError::FormatVersion(2)) => {}
            other => panic!("expected format version rejection, got {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_format_version() {
        let doc = br#"{ "titles": [] }"#;
        assert!(matches!(parse_remote(doc), Err(ManifestError::Json(_))));
    }

    #[test]
    fn rejects_non_hex_title_id() {
        let doc = br#"{ "format_version": 1, "titles": [ { "id": "zzzz", "version": 1 } ] }"#;
        match parse_remote(doc) {
            Err(ManifestError::TitleId(id)) => assert_eq!(id, "zzzz"),
            other => panic!("expected title id rejection, got {other:?}"),
        }
    }
}
