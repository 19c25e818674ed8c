use thiserror::Error;

use crate::asyncop::AsyncOp;
use crate::manifest::VersionEntry;
use crate::title::{ContentMetaStatus, ControlData, TitleId, TitleRecord};

/// Records fetched per page when enumerating installed titles.
pub const RECORD_PAGE: usize = 32;

/// Opaque status code from a failed service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("service call failed: 0x{code:X}")]
pub struct SvcError {
    pub code: u32,
}

impl SvcError {
    pub fn new(code: u32) -> Self {
        Self { code }
    }
}

#[derive(Debug, Error)]
pub enum UpdateStartError {
    /// The service already holds an update request for this title. Routine
    /// condition, retry later.
    #[error("an update for this title is already in flight")]
    AlreadyInFlight,
    #[error(transparent)]
    Transport(#[from] SvcError),
}

/// The IPC surface this tool consumes from the console's title-management
/// and version-manager services. One implementor is one console session;
/// the marshaling behind it is opaque. Every call either returns data or
/// fails with an opaque status code, and nothing here retries.
pub trait SystemServices {
    /// Page through installed application records.
    fn list_records(&self, offset: usize, limit: usize) -> Result<Vec<TitleRecord>, SvcError>;

    /// Installed content metadata for one title.
    fn content_meta_statuses(&self, title: TitleId) -> Result<Vec<ContentMetaStatus>, SvcError>;

    /// Minimum version the OS will allow this title to launch at.
    fn launch_required_version(&self, title: TitleId) -> Result<u32, SvcError>;

    /// Overwrite the launch-required floor for one title.
    fn push_launch_version(&self, title: TitleId, version: u32) -> Result<(), SvcError>;

    /// Name and thumbnail for one title, returned by value.
    fn control_data(&self, title: TitleId) -> Result<ControlData, SvcError>;

    /// Read the OS's resident version list into a buffer of at most `max`
    /// rows. Rows beyond the buffer are silently dropped by the service.
    fn list_version_entries(&self, max: usize) -> Result<Vec<VersionEntry>, SvcError>;

    /// Replace the OS's resident version list wholesale.
    fn import_version_list(&self, entries: &[VersionEntry], timestamp: u64)
        -> Result<(), SvcError>;

    /// Ask the OS to install the latest patch for a title. Rejected
    /// immediately when a request for the same title is still outstanding.
    fn request_update(&self, title: TitleId) -> Result<Box<dyn AsyncOp>, UpdateStartError>;

    /// Ask the OS to pull a fresh version manifest from the CDN. The async
    /// result payload is the raw JSON document.
    fn request_version_data(&self) -> Result<Box<dyn AsyncOp>, SvcError>;

    /// Coarse transport reachability. Cheap enough to poll.
    fn internet_available(&self) -> bool;
}
