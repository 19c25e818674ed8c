//! In-memory stand-in for the console's title-management and
//! version-manager services. The real IPC marshaling layer is a drop-in
//! implementor of [`SystemServices`]; this backend keeps the same contract
//! (paged listing, bounded version-list reads, immediate in-flight
//! rejection, async results behind handles) so the engine, the
//! presentation layers, and the tests all run against it unchanged.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::asyncop::{AsyncOp, WaitOutcome};
use crate::manifest::VersionEntry;
use crate::svc::{SvcError, SystemServices, UpdateStartError};
use crate::title::{
    ContentMetaKind, ContentMetaStatus, ControlData, RecordKind, TitleId, TitleRecord,
};

#[derive(Default)]
struct SimState {
    records: Vec<TitleRecord>,
    metas: HashMap<TitleId, Vec<ContentMetaStatus>>,
    control: HashMap<TitleId, ControlData>,
    required: HashMap<TitleId, u32>,
    version_list: Vec<VersionEntry>,
    version_list_timestamp: u64,
    remote_document: Option<Vec<u8>>,
    in_flight: HashSet<TitleId>,
    update_failures: HashMap<TitleId, u32>,
    meta_failures: HashSet<TitleId>,
    stalled_updates: HashSet<TitleId>,
    online: bool,
    open_ops: u32,
}

#[derive(Clone)]
pub struct SimServices {
    state: Arc<Mutex<SimState>>,
}

impl SimServices {
    pub fn empty() -> Self {
        let state = SimState {
            online: true,
            ..SimState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// A small seeded console: a mix of current, outdated, launch-gated,
    /// archived, and busy titles, plus a remote document to fetch.
    pub fn sample() -> Self {
        let sim = Self::empty();
        let aurora = TitleId(0x0100_AD00_0000_1000);
        let mistral = TitleId(0x0100_BE00_0000_2000);
        let hollow = TitleId(0x0100_CF00_0000_3000);
        let starfall = TitleId(0x0100_DA00_0000_4000);
        let relic = TitleId(0x0100_EB00_0000_5000);

        sim.add_title(aurora, "Aurora Drift", 2);
        sim.set_available(aurora, 5);

        sim.add_title(mistral, "Mistral Kart", 3);
        sim.set_available(mistral, 3);
        sim.add_content_meta(
            mistral,
            ContentMetaStatus {
                kind: ContentMetaKind::AddOnContent,
                version: 1,
            },
        );

        sim.add_title(hollow, "Hollow Depths", 1);
        sim.set_available(hollow, 1);
        sim.set_required(hollow, 4);

        sim.add_title(starfall, "Starfall Saga", 0);
        sim.set_available(starfall, 2);
        sim.mark_in_flight(starfall);

        sim.add_title(relic, "Relic Hunters", 0);
        sim.set_available(relic, 9);
        sim.set_record_kind(relic, RecordKind::Archived);

        // A record kind this tool has no name for still reconciles.
        let drifter = TitleId(0x0100_FC00_0000_6000);
        sim.add_title(drifter, "Dune Drifter", 1);
        sim.set_record_kind(drifter, RecordKind::Other(0x0e));

        let remote = format!(
            concat!(
                r#"{{ "format_version": 1, "titles": ["#,
                r#" {{ "id": "{:x}", "version": 6, "required_version": 0 }},"#,
                r#" {{ "id": "{:x}", "version": 4, "required_version": 0 }},"#,
                r#" {{ "id": "{:x}", "version": 1, "required_version": 4 }}"#,
                r#" ] }}"#
            ),
            aurora.0, mistral.0, hollow.0
        );
        sim.set_remote_document(remote.into_bytes());
        sim
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state poisoned")
    }

    pub fn add_title(&self, id: TitleId, name: &str, installed_patch_version: u32) {
        let mut state = self.state();
        state.records.push(TitleRecord {
            id,
            kind: RecordKind::Installed,
        });
        let mut metas = vec![ContentMetaStatus {
            kind: ContentMetaKind::Application,
            version: 0,
        }];
        if installed_patch_version > 0 {
            metas.push(ContentMetaStatus {
                kind: ContentMetaKind::Patch,
                version: installed_patch_version,
            });
        }
        state.metas.insert(id, metas);
        state.control.insert(
            id,
            ControlData {
                name: name.to_string(),
                thumbnail: None,
            },
        );
    }

    pub fn add_content_meta(&self, id: TitleId, status: ContentMetaStatus) {
        self.state().metas.entry(id).or_default().push(status);
    }

    pub fn set_record_kind(&self, id: TitleId, kind: RecordKind) {
        let mut state = self.state();
        if let Some(record) = state.records.iter_mut().find(|record| record.id == id) {
            record.kind = kind;
        }
    }

    /// Append a version-list row for this title's patch content.
    pub fn set_available(&self, id: TitleId, version: u32) {
        self.state().version_list.push(VersionEntry {
            patch_id: id.patch_id(),
            version,
            required: 0,
        });
    }

    pub fn set_required(&self, id: TitleId, version: u32) {
        self.state().required.insert(id, version);
    }

    pub fn set_remote_document(&self, document: Vec<u8>) {
        self.state().remote_document = Some(document);
    }

    /// Pretend some other client already has an update request outstanding.
    pub fn mark_in_flight(&self, id: TitleId) {
        self.state().in_flight.insert(id);
    }

    fn apply_install(&self, id: TitleId) {
        let mut state = self.state();
        let target = state
            .version_list
            .iter()
            .rev()
            .find(|entry| entry.patch_id == id.patch_id())
            .map(|entry| entry.version)
            .unwrap_or(0);
        let metas = state.metas.entry(id).or_default();
        metas.retain(|status| status.kind != ContentMetaKind::Patch);
        metas.push(ContentMetaStatus {
            kind: ContentMetaKind::Patch,
            version: target,
        });
    }
}

// Fault injection and state inspection for the test suites.
#[allow(dead_code)]
impl SimServices {
    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    pub fn fail_update(&self, id: TitleId, code: u32) {
        self.state().update_failures.insert(id, code);
    }

    pub fn fail_content_meta(&self, id: TitleId) {
        self.state().meta_failures.insert(id);
    }

    pub fn stall_update(&self, id: TitleId) {
        self.state().stalled_updates.insert(id);
    }

    pub fn installed_version(&self, id: TitleId) -> u32 {
        self.state()
            .metas
            .get(&id)
            .into_iter()
            .flatten()
            .filter(|status| status.kind == ContentMetaKind::Patch)
            .map(|status| status.version)
            .max()
            .unwrap_or(0)
    }

    pub fn required_version(&self, id: TitleId) -> u32 {
        self.state().required.get(&id).copied().unwrap_or(0)
    }

    pub fn resident_rows(&self) -> Vec<VersionEntry> {
        self.state().version_list.clone()
    }

    pub fn resident_timestamp(&self) -> u64 {
        self.state().version_list_timestamp
    }

    /// Async operations created but not yet closed. Zero between engine
    /// operations means no handle leaked.
    pub fn open_ops(&self) -> u32 {
        self.state().open_ops
    }
}

impl SystemServices for SimServices {
    fn list_records(&self, offset: usize, limit: usize) -> Result<Vec<TitleRecord>, SvcError> {
        let state = self.state();
        Ok(state
            .records
            .iter()
            .skip(offset)
            .take(limit)
            .copied()
            .collect())
    }

    fn content_meta_statuses(&self, title: TitleId) -> Result<Vec<ContentMetaStatus>, SvcError> {
        let state = self.state();
        if state.meta_failures.contains(&title) {
            return Err(SvcError::new(0x0610));
        }
        Ok(state.metas.get(&title).cloned().unwrap_or_default())
    }

    fn launch_required_version(&self, title: TitleId) -> Result<u32, SvcError> {
        Ok(self.state().required.get(&title).copied().unwrap_or(0))
    }

    fn push_launch_version(&self, title: TitleId, version: u32) -> Result<(), SvcError> {
        self.state().required.insert(title, version);
        Ok(())
    }

    fn control_data(&self, title: TitleId) -> Result<ControlData, SvcError> {
        self.state()
            .control
            .get(&title)
            .cloned()
            .ok_or(SvcError::new(0x0410))
    }

    fn list_version_entries(&self, max: usize) -> Result<Vec<VersionEntry>, SvcError> {
        let state = self.state();
        Ok(state.version_list.iter().take(max).copied().collect())
    }

    fn import_version_list(
        &self,
        entries: &[VersionEntry],
        timestamp: u64,
    ) -> Result<(), SvcError> {
        let mut state = self.state();
        state.version_list = entries.to_vec();
        state.version_list_timestamp = timestamp;
        Ok(())
    }

    fn request_update(&self, title: TitleId) -> Result<Box<dyn AsyncOp>, UpdateStartError> {
        let mut state = self.state();
        if state.in_flight.contains(&title) {
            return Err(UpdateStartError::AlreadyInFlight);
        }
        let outcome = match state.update_failures.get(&title) {
            Some(&code) => Err(SvcError::new(code)),
            None => Ok(()),
        };
        let stalled = state.stalled_updates.contains(&title);
        state.open_ops += 1;
        drop(state);
        Ok(Box::new(SimUpdateOp {
            services: self.clone(),
            title,
            outcome,
            stalled,
            closed: false,
        }))
    }

    fn request_version_data(&self) -> Result<Box<dyn AsyncOp>, SvcError> {
        let mut state = self.state();
        let document = state.remote_document.clone().ok_or(SvcError::new(0x0234))?;
        state.open_ops += 1;
        drop(state);
        Ok(Box::new(SimFetchOp {
            services: self.clone(),
            document,
            closed: false,
        }))
    }

    fn internet_available(&self) -> bool {
        self.state().online
    }
}

struct SimUpdateOp {
    services: SimServices,
    title: TitleId,
    outcome: Result<(), SvcError>,
    stalled: bool,
    closed: bool,
}

impl AsyncOp for SimUpdateOp {
    fn wait(&mut self, _timeout: Duration) -> Result<WaitOutcome, SvcError> {
        Ok(if self.stalled {
            WaitOutcome::TimedOut
        } else {
            WaitOutcome::Ready
        })
    }

    fn take_result(&mut self) -> Result<Vec<u8>, SvcError> {
        self.outcome?;
        self.services.apply_install(self.title);
        Ok(Vec::new())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.services.state().open_ops -= 1;
        }
    }
}

struct SimFetchOp {
    services: SimServices,
    document: Vec<u8>,
    closed: bool,
}

impl AsyncOp for SimFetchOp {
    fn wait(&mut self, _timeout: Duration) -> Result<WaitOutcome, SvcError> {
        Ok(WaitOutcome::Ready)
    }

    fn take_result(&mut self) -> Result<Vec<u8>, SvcError> {
        Ok(std::mem::take(&mut self.document))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.services.state().open_ops -= 1;
        }
    }
}
