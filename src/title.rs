use std::fmt;

/// Bit set on a title id to address its patch content in the version list.
pub const PATCH_ID_BIT: u64 = 0x800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TitleId(pub u64);

impl TitleId {
    pub fn patch_id(self) -> u64 {
        self.0 | PATCH_ID_BIT
    }
}

impl fmt::Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Installed,
    Archived,
    Downloading,
    Other(u8),
}

impl RecordKind {
    /// Archived and downloading titles never take part in reconciliation.
    pub fn reconcilable(self) -> bool {
        !matches!(self, RecordKind::Archived | RecordKind::Downloading)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TitleRecord {
    pub id: TitleId,
    pub kind: RecordKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentMetaKind {
    Application,
    Patch,
    AddOnContent,
    Other(u8),
}

#[derive(Debug, Clone, Copy)]
pub struct ContentMetaStatus {
    pub kind: ContentMetaKind,
    pub version: u32,
}

/// Control data for one title, owned by the caller. Each query returns a
/// fresh value; nothing is shared between lookups.
#[derive(Debug, Clone, Default)]
pub struct ControlData {
    pub name: String,
    pub thumbnail: Option<Vec<u8>>,
}

/// Everything the detail view needs about one title, derived on demand.
#[derive(Debug, Clone)]
pub struct TitleView {
    pub id: TitleId,
    pub name: String,
    pub installed_version: u32,
    pub available_version: u32,
    pub required_version: u32,
    pub thumbnail: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_id_sets_the_patch_bit() {
        let id = TitleId(0x0100_0000_0000_1000);
        assert_eq!(id.patch_id(), 0x0100_0000_0000_1800);
    }

    #[test]
    fn display_is_padded_hex() {
        assert_eq!(TitleId(0xAB).to_string(), "00000000000000AB");
    }

    #[test]
    fn archived_and_downloading_are_excluded() {
        assert!(RecordKind::Installed.reconcilable());
        assert!(RecordKind::Other(7).reconcilable());
        assert!(!RecordKind::Archived.reconcilable());
        assert!(!RecordKind::Downloading.reconcilable());
    }
}
