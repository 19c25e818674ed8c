use std::collections::HashMap;
use std::time::Duration;

use log::{debug, warn};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::asyncop::{AsyncError, AsyncHandle, DEFAULT_WAIT};
use crate::manifest::{self, Manifest, ManifestError};
use crate::svc::{SvcError, SystemServices, UpdateStartError, RECORD_PAGE};
use crate::title::{ContentMetaKind, TitleId, TitleView};

/// One entry of the update candidate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    /// The OS-enforced launch floor sits above the installed version. Shown
    /// as urgent; cleared by [`Updater::clear_launch_requirement`], not by
    /// an update.
    pub needs_launch_bump: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The service already holds a request for this title; try again later.
    AlreadyInFlight,
    TimedOut,
    Failed(u32),
}

/// Reconciles installed patch versions against the version manifest and
/// drives the console's update-install service.
///
/// Owns the manifest snapshot and the candidate set exclusively; the
/// presentation layers read through accessors and invoke operations. All
/// operations block the calling thread, so a single foreground thread
/// drives everything and no locking is needed here.
pub struct Updater<S: SystemServices> {
    svc: S,
    manifest: Manifest,
    candidates: HashMap<TitleId, Candidate>,
    selected: Option<TitleId>,
    log: Vec<String>,
    wait_budget: Duration,
}

impl<S: SystemServices> Updater<S> {
    pub fn new(svc: S) -> Self {
        Self {
            svc,
            manifest: Manifest::default(),
            candidates: HashMap::new(),
            selected: None,
            log: Vec::new(),
            wait_budget: DEFAULT_WAIT,
        }
    }

    pub fn with_wait_budget(mut self, wait_budget: Duration) -> Self {
        self.wait_budget = wait_budget;
        self
    }

    /// Reload the OS's resident version list and recompute candidates.
    pub fn refresh(&mut self) -> Result<(), ManifestError> {
        self.manifest = manifest::load_cached(&self.svc)?;
        self.push_log(format!("loaded version list ({} rows)", self.manifest.len()));
        self.recompute();
        Ok(())
    }

    /// Fetch a fresh manifest from the CDN. The held snapshot is replaced
    /// only after the whole document parsed; on any failure it stays as is.
    pub fn fetch_remote(&mut self) -> Result<(), ManifestError> {
        let fetched = manifest::fetch_remote(&self.svc, self.wait_budget)?;
        self.manifest = fetched;
        self.push_log(format!("fetched manifest ({} rows)", self.manifest.len()));
        self.recompute();
        Ok(())
    }

    /// Overwrite the resident version list with an empty payload, then
    /// recompute from the now-empty table. Destructive; callers gate this
    /// behind user confirmation.
    pub fn wipe(&mut self) -> Result<(), ManifestError> {
        manifest::wipe_cached(&self.svc)?;
        self.push_log("wiped resident version list".to_string());
        self.refresh()
    }

    /// Rebuild the candidate set from scratch: every installed title that
    /// is not archived or downloading and sits below its available or
    /// launch-required version. A failed query for one title degrades that
    /// value to 0 instead of aborting the pass.
    pub fn recompute(&mut self) {
        self.candidates.clear();
        self.selected = None;

        let mut offset = 0;
        loop {
            let page = match self.svc.list_records(offset, RECORD_PAGE) {
                Ok(page) => page,
                Err(rc) => {
                    warn!("title record listing stopped early: {rc}");
                    break;
                }
            };
            if page.is_empty() {
                break;
            }
            offset += page.len();

            for record in page {
                if !record.kind.reconcilable() {
                    continue;
                }
                let id = record.id;
                let installed = self.installed_version(id);
                let available = self.manifest.available_version(id);
                let required = self.required_version(id);

                if installed >= available && installed >= required {
                    continue;
                }

                let name = self.display_name(id);
                self.push_log(format!(
                    "queued {name}: installed {installed}, available {available}"
                ));
                self.candidates.insert(
                    id,
                    Candidate {
                        name,
                        needs_launch_bump: required > installed,
                    },
                );
            }
        }
    }

    /// Issue one update-install request and block until it settles. On
    /// `Applied` the title leaves the candidate set and the selection is
    /// cleared if it pointed there.
    pub fn update_one(&mut self, id: TitleId) -> UpdateOutcome {
        let name = self
            .candidates
            .get(&id)
            .map(|candidate| candidate.name.clone())
            .unwrap_or_else(|| id.to_string());
        self.push_log(format!("updating [{id}] {name}"));

        let op = match self.svc.request_update(id) {
            Ok(op) => op,
            Err(UpdateStartError::AlreadyInFlight) => {
                self.push_log(format!("{name}: update already in progress, retry later"));
                return UpdateOutcome::AlreadyInFlight;
            }
            Err(UpdateStartError::Transport(rc)) => {
                self.push_log(format!("{name}: update request failed: {rc}"));
                return UpdateOutcome::Failed(rc.code);
            }
        };

        match AsyncHandle::new(op).finish(self.wait_budget) {
            Ok(_) => {
                self.candidates.remove(&id);
                if self.selected == Some(id) {
                    self.selected = None;
                }
                self.push_log(format!("{name}: update applied"));
                UpdateOutcome::Applied
            }
            Err(AsyncError::TimedOut(budget)) => {
                self.push_log(format!("{name}: still installing after {budget:?}"));
                UpdateOutcome::TimedOut
            }
            Err(AsyncError::Remote(rc)) => {
                self.push_log(format!("{name}: update failed: {rc}"));
                UpdateOutcome::Failed(rc.code)
            }
        }
    }

    /// Update every current candidate in turn, then clear the whole set.
    /// Individual failures are logged and discarded; even titles whose
    /// update failed or was already in flight leave the visible set.
    pub fn update_all(&mut self) {
        let ids: Vec<TitleId> = self.candidates.keys().copied().collect();
        for id in ids {
            let outcome = self.update_one(id);
            if outcome != UpdateOutcome::Applied {
                debug!("bulk update left {id} at {outcome:?}");
            }
        }
        self.candidates.clear();
        self.selected = None;
        self.push_log("bulk update pass finished".to_string());
    }

    /// Push a launch-required floor of 0 for one title. Leaves the
    /// update-needed status alone; only the urgency flag flips.
    pub fn clear_launch_requirement(&mut self, id: TitleId) -> Result<(), SvcError> {
        self.svc.push_launch_version(id, 0)?;
        if let Some(candidate) = self.candidates.get_mut(&id) {
            candidate.needs_launch_bump = false;
        }
        self.push_log(format!("cleared launch requirement for [{id}]"));
        Ok(())
    }

    /// Highest installed patch version, 0 when no patch content exists or
    /// the query fails.
    pub fn installed_version(&self, id: TitleId) -> u32 {
        match self.svc.content_meta_statuses(id) {
            Ok(statuses) => statuses
                .iter()
                .filter(|status| status.kind == ContentMetaKind::Patch)
                .map(|status| status.version)
                .max()
                .unwrap_or(0),
            Err(rc) => {
                debug!("content meta query for {id} failed: {rc}");
                0
            }
        }
    }

    /// Launch-required floor, 0 when unset or the query fails.
    pub fn required_version(&self, id: TitleId) -> u32 {
        match self.svc.launch_required_version(id) {
            Ok(version) => version,
            Err(rc) => {
                debug!("launch-required query for {id} failed: {rc}");
                0
            }
        }
    }

    /// Everything the detail view shows for one title, computed on demand.
    pub fn title_view(&self, id: TitleId) -> TitleView {
        let control = self.svc.control_data(id).unwrap_or_default();
        let name = if control.name.is_empty() {
            id.to_string()
        } else {
            control.name
        };
        TitleView {
            id,
            name,
            installed_version: self.installed_version(id),
            available_version: self.manifest.available_version(id),
            required_version: self.required_version(id),
            thumbnail: control.thumbnail,
        }
    }

    pub fn candidates(&self) -> &HashMap<TitleId, Candidate> {
        &self.candidates
    }

    /// Candidates in a stable display order (by name, then id). The set
    /// itself carries no order guarantee.
    pub fn candidate_rows(&self) -> Vec<(TitleId, &Candidate)> {
        let mut rows: Vec<(TitleId, &Candidate)> = self
            .candidates
            .iter()
            .map(|(&id, candidate)| (id, candidate))
            .collect();
        rows.sort_by(|a, b| a.1.name.cmp(&b.1.name).then(a.0.cmp(&b.0)));
        rows
    }

    pub fn select(&mut self, id: Option<TitleId>) {
        self.selected = id.filter(|id| self.candidates.contains_key(id));
    }

    pub fn selected(&self) -> Option<TitleId> {
        self.selected
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn log_lines(&self) -> &[String] {
        &self.log
    }

    fn push_log(&mut self, line: String) {
        let stamp = OffsetDateTime::now_utc()
            .format(format_description!("[hour]:[minute]:[second]"))
            .unwrap_or_default();
        self.log.push(format!("[{stamp}] {line}"));
    }

    fn display_name(&self, id: TitleId) -> String {
        match self.svc.control_data(id) {
            Ok(control) if !control.name.is_empty() => control.name,
            Ok(_) => id.to_string(),
            Err(rc) => {
                debug!("control data query for {id} failed: {rc}");
                id.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimServices;

    const A: TitleId = TitleId(0x0100_0000_0000_1000);
    const B: TitleId = TitleId(0x0100_0000_0000_2000);
    const C: TitleId = TitleId(0x0100_0000_0000_3000);

    fn updater(sim: &SimServices) -> Updater<SimServices> {
        let mut updater = Updater::new(sim.clone());
        updater.refresh().unwrap();
        updater
    }

    #[test]
    fn outdated_title_becomes_candidate() {
        let sim = SimServices::empty();
        sim.add_title(A, "Aurora Drift", 5);
        sim.set_available(A, 7);
        let updater = updater(&sim);
        let candidate = &updater.candidates()[&A];
        assert_eq!(candidate.name, "Aurora Drift");
        assert!(!candidate.needs_launch_bump);
    }

    #[test]
    fn launch_floor_alone_makes_a_candidate() {
        // installed=5, available=3, required=9
        let sim = SimServices::empty();
        sim.add_title(A, "Hollow Depths", 5);
        sim.set_available(A, 3);
        sim.set_required(A, 9);
        let updater = updater(&sim);
        assert!(updater.candidates()[&A].needs_launch_bump);
    }

    #[test]
    fn current_title_is_not_a_candidate() {
        // installed=9, available=7, required=9
        let sim = SimServices::empty();
        sim.add_title(A, "Mistral Kart", 9);
        sim.set_available(A, 7);
        sim.set_required(A, 9);
        let updater = updater(&sim);
        assert!(updater.candidates().is_empty());
    }

    #[test]
    fn archived_and_downloading_titles_are_skipped() {
        let sim = SimServices::empty();
        sim.add_title(A, "Archived One", 0);
        sim.set_available(A, 4);
        sim.set_record_kind(A, crate::title::RecordKind::Archived);
        sim.add_title(B, "Downloading One", 0);
        sim.set_available(B, 4);
        sim.set_record_kind(B, crate::title::RecordKind::Downloading);
        let updater = updater(&sim);
        assert!(updater.candidates().is_empty());
    }

    #[test]
    fn meta_query_failure_degrades_installed_to_zero() {
        let sim = SimServices::empty();
        sim.add_title(A, "Flaky", 9);
        sim.set_available(A, 4);
        sim.fail_content_meta(A);
        let updater = updater(&sim);
        // With installed degraded to 0 the available version wins.
        assert!(updater.candidates().contains_key(&A));
    }

    #[test]
    fn recompute_resets_selection() {
        let sim = SimServices::empty();
        sim.add_title(A, "Aurora Drift", 1);
        sim.set_available(A, 2);
        let mut updater = updater(&sim);
        updater.select(Some(A));
        assert_eq!(updater.selected(), Some(A));
        updater.recompute();
        assert_eq!(updater.selected(), None);
    }

    #[test]
    fn applied_update_leaves_the_set_and_clears_selection() {
        let sim = SimServices::empty();
        sim.add_title(A, "Aurora Drift", 1);
        sim.set_available(A, 2);
        let mut updater = updater(&sim);
        updater.select(Some(A));
        assert_eq!(updater.update_one(A), UpdateOutcome::Applied);
        assert!(!updater.candidates().contains_key(&A));
        assert_eq!(updater.selected(), None);
        assert_eq!(sim.installed_version(A), 2);
    }

    #[test]
    fn in_flight_update_keeps_the_candidate() {
        let sim = SimServices::empty();
        sim.add_title(A, "Aurora Drift", 1);
        sim.set_available(A, 2);
        sim.mark_in_flight(A);
        let mut updater = updater(&sim);
        assert_eq!(updater.update_one(A), UpdateOutcome::AlreadyInFlight);
        assert!(updater.candidates().contains_key(&A));
    }

    #[test]
    fn failed_update_keeps_the_candidate() {
        let sim = SimServices::empty();
        sim.add_title(A, "Aurora Drift", 1);
        sim.set_available(A, 2);
        sim.fail_update(A, 0x2345);
        let mut updater = updater(&sim);
        assert_eq!(updater.update_one(A), UpdateOutcome::Failed(0x2345));
        assert!(updater.candidates().contains_key(&A));
    }

    #[test]
    fn bulk_update_always_drains_the_set() {
        let sim = SimServices::empty();
        sim.add_title(A, "Good", 1);
        sim.set_available(A, 2);
        sim.add_title(B, "Bad", 1);
        sim.set_available(B, 2);
        sim.fail_update(B, 0x1234);
        sim.add_title(C, "Busy", 1);
        sim.set_available(C, 2);
        sim.mark_in_flight(C);
        let mut updater = updater(&sim);
        assert_eq!(updater.candidates().len(), 3);
        updater.update_all();
        assert!(updater.candidates().is_empty());
        assert_eq!(updater.selected(), None);
    }

    #[test]
    fn wipe_then_recompute_yields_empty_set() {
        let sim = SimServices::empty();
        sim.add_title(A, "Aurora Drift", 1);
        sim.set_available(A, 5);
        let mut updater = updater(&sim);
        assert_eq!(updater.candidates().len(), 1);
        updater.wipe().unwrap();
        assert!(updater.candidates().is_empty());
        assert!(updater.manifest().is_empty());
        assert_eq!(
            sim.resident_timestamp(),
            crate::manifest::WIPE_TIMESTAMP
        );
    }

    #[test]
    fn failed_fetch_leaves_manifest_untouched() {
        let sim = SimServices::empty();
        sim.add_title(A, "Aurora Drift", 1);
        sim.set_available(A, 5);
        sim.set_remote_document(br#"{ "format_version": 2, "titles": [] }"#.to_vec());
        let mut updater = updater(&sim);
        let rows_before = updater.manifest().len();
        assert!(matches!(
            updater.fetch_remote(),
            Err(ManifestError::FormatVersion(2))
        ));
        assert_eq!(updater.manifest().len(), rows_before);
        assert!(updater.candidates().contains_key(&A));
    }

    #[test]
    fn successful_fetch_replaces_manifest_and_recomputes() {
        let sim = SimServices::empty();
        sim.add_title(A, "Aurora Drift", 1);
        let doc = format!(
            r#"{{ "format_version": 1, "titles": [ {{ "id": "{:x}", "version": 4, "required_version": 0 }} ] }}"#,
            A.0
        );
        sim.set_remote_document(doc.into_bytes());
        let mut updater = updater(&sim);
        assert!(updater.candidates().is_empty());
        updater.fetch_remote().unwrap();
        assert_eq!(updater.manifest().available_version(A), 4);
        assert!(updater.candidates().contains_key(&A));
        // The fetched table was pushed back into the OS cache.
        assert_eq!(sim.resident_rows().len(), 1);
    }

    #[test]
    fn clearing_launch_requirement_flips_only_the_flag() {
        let sim = SimServices::empty();
        sim.add_title(A, "Hollow Depths", 3);
        sim.set_available(A, 5);
        sim.set_required(A, 4);
        let mut updater = updater(&sim);
        assert!(updater.candidates()[&A].needs_launch_bump);
        updater.clear_launch_requirement(A).unwrap();
        let candidate = &updater.candidates()[&A];
        assert!(!candidate.needs_launch_bump);
        // Still outdated, so still a candidate.
        assert_eq!(updater.candidates().len(), 1);
        assert_eq!(sim.required_version(A), 0);
    }

    #[test]
    fn no_async_handles_leak_across_operations() {
        let sim = SimServices::empty();
        sim.add_title(A, "Good", 1);
        sim.set_available(A, 2);
        sim.add_title(B, "Bad", 1);
        sim.set_available(B, 2);
        sim.fail_update(B, 0x1234);
        let mut updater = updater(&sim);
        updater.update_all();
        assert_eq!(sim.open_ops(), 0);
    }
}
