//! Copy-on-write edit buffer for allele calls with an explicit Viewing/Editing/Saving machine.
//!
//! The baseline is only replaced after the store acknowledged a save. A failed save returns to
//! Editing with the buffer untouched.

use allelescope_protocol::AlleleUpdate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::error::{ErrorCode, ViewerError};
use crate::notice::{NoticeBoard, NoticeKind};
use crate::remote::RemoteError;
use crate::sample::{AlleleCall, AlleleSlot, AlleleStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorState {
    Viewing,
    Editing,
    Saving,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlleleChange {
    pub marker: String,
    pub before: [Option<String>; 2],
    pub after: [Option<String>; 2],
}

fn slots(call: Option<&AlleleCall>) -> [Option<String>; 2] {
    match call {
        Some(call) => [AlleleSlot::First, AlleleSlot::Second].map(|s| call.allele(s).map(str::to_string)),
        None => [None, None],
    }
}

#[derive(Clone, Debug)]
pub struct AlleleEditor {
    sample_id: String,
    baseline: BTreeMap<String, AlleleCall>,
    buffer: BTreeMap<String, AlleleCall>,
    state: EditorState,
}

impl AlleleEditor {
    pub fn new(sample_id: &str, baseline: BTreeMap<String, AlleleCall>) -> Self {
        Self {
            sample_id: sample_id.to_string(),
            buffer: baseline.clone(),
            baseline,
            state: EditorState::Viewing,
        }
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn state(&self) -> EditorState {
        self.state
    }

    pub fn baseline(&self) -> &BTreeMap<String, AlleleCall> {
        &self.baseline
    }

    pub fn buffer(&self) -> &BTreeMap<String, AlleleCall> {
        &self.buffer
    }

    pub fn status(&self, marker: &str) -> AlleleStatus {
        self.buffer
            .get(marker)
            .map(AlleleCall::status)
            .unwrap_or(AlleleStatus::Uncalled)
    }

    fn contract(&self, action: &str) -> ViewerError {
        ViewerError::new(
            ErrorCode::Contract,
            format!("Cannot {action} while the allele editor is {:?}", self.state),
        )
    }

    /// Viewing -> Editing. Already editing is fine.
    pub fn begin_edit(&mut self) -> Result<(), ViewerError> {
        match self.state {
            EditorState::Viewing | EditorState::Editing => {
                self.state = EditorState::Editing;
                Ok(())
            }
            EditorState::Saving => Err(self.contract("start editing")),
        }
    }

    /// Updates one slot of one marker and returns the recomputed status.
    ///
    /// # Panics
    ///
    /// Panics unless the editor is in the Editing state. That is a caller bug, not bad data.
    pub fn set_allele(&mut self, marker: &str, slot: AlleleSlot, value: &str) -> AlleleStatus {
        match self.try_set_allele(marker, slot, value) {
            Ok(status) => status,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn try_set_allele(
        &mut self,
        marker: &str,
        slot: AlleleSlot,
        value: &str,
    ) -> Result<AlleleStatus, ViewerError> {
        if self.state != EditorState::Editing {
            return Err(self.contract("set an allele"));
        }
        let marker = marker.trim();
        if marker.is_empty() {
            return Err(ViewerError::invalid_input("Marker name must not be empty"));
        }
        let call = self
            .buffer
            .entry(marker.to_string())
            .or_insert_with(|| AlleleCall::new(marker));
        call.set_allele(slot, value);
        Ok(call.status())
    }

    /// Editing -> Viewing, discarding the buffer.
    pub fn cancel_edit(&mut self) -> Result<(), ViewerError> {
        match self.state {
            EditorState::Saving => Err(self.contract("cancel")),
            EditorState::Viewing | EditorState::Editing => {
                self.buffer = self.baseline.clone();
                self.state = EditorState::Viewing;
                Ok(())
            }
        }
    }

    /// Editing -> Saving. Returns the complete buffer as the request body.
    pub fn begin_save(&mut self) -> Result<AlleleUpdate, ViewerError> {
        if self.state != EditorState::Editing {
            return Err(self.contract("save"));
        }
        self.state = EditorState::Saving;
        info!(
            sample_id = self.sample_id.as_str(),
            changes = self.diff().len(),
            "saving allele calls"
        );
        Ok(AlleleUpdate {
            sample_id: self.sample_id.clone(),
            alleles: self
                .buffer
                .iter()
                .map(|(marker, call)| (marker.clone(), call.to_record()))
                .collect(),
        })
    }

    /// Saving -> Viewing on success, Saving -> Editing on failure. Posts exactly one notice.
    pub fn finish_save(
        &mut self,
        result: Result<(), RemoteError>,
        notices: &mut NoticeBoard,
    ) -> Result<(), ViewerError> {
        if self.state != EditorState::Saving {
            return Err(self.contract("finish a save"));
        }
        let sample_id = self.sample_id.clone();
        match result {
            Ok(()) => {
                self.baseline = self.buffer.clone();
                self.state = EditorState::Viewing;
                info!(sample_id = sample_id.as_str(), "allele calls saved");
                notices.push(NoticeKind::Saved { sample_id }, "Allele calls saved");
            }
            Err(e) => {
                self.state = EditorState::Editing;
                warn!(sample_id = sample_id.as_str(), error = %e, "saving allele calls failed");
                notices.push(
                    NoticeKind::SaveFailed { sample_id },
                    format!("Saving allele calls failed, edits kept: {e}"),
                );
            }
        }
        Ok(())
    }

    /// Per-marker slot changes of the buffer against the baseline.
    pub fn diff(&self) -> Vec<AlleleChange> {
        let markers = self
            .baseline
            .keys()
            .chain(self.buffer.keys())
            .collect::<BTreeSet<_>>();
        markers
            .into_iter()
            .filter_map(|marker| {
                let before = slots(self.baseline.get(marker));
                let after = slots(self.buffer.get(marker));
                (before != after).then(|| AlleleChange {
                    marker: marker.clone(),
                    before,
                    after,
                })
            })
            .collect()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        !self.diff().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editor() -> AlleleEditor {
        let mut baseline = BTreeMap::new();
        baseline.insert(
            "D3S1358".to_string(),
            AlleleCall::with_alleles("D3S1358", "15", "16"),
        );
        baseline.insert("vWA".to_string(), AlleleCall::with_alleles("vWA", "17", "17"));
        AlleleEditor::new("sample-1", baseline)
    }

    #[test]
    fn test_set_then_clear_yields_uncalled() {
        let mut editor = AlleleEditor::new("s", BTreeMap::new());
        editor.begin_edit().unwrap();
        assert_eq!(
            editor.set_allele("TH01", AlleleSlot::First, "12"),
            AlleleStatus::Partial
        );
        assert_eq!(
            editor.set_allele("TH01", AlleleSlot::First, ""),
            AlleleStatus::Uncalled
        );
        assert_eq!(editor.status("TH01"), AlleleStatus::Uncalled);
        assert!(!editor.has_unsaved_changes());
    }

    #[test]
    fn test_status_follows_each_edit() {
        let mut editor = editor();
        editor.begin_edit().unwrap();
        assert_eq!(
            editor.set_allele("vWA", AlleleSlot::Second, "18"),
            AlleleStatus::Complete
        );
        assert_eq!(
            editor.set_allele("vWA", AlleleSlot::First, " "),
            AlleleStatus::Partial
        );
        assert_eq!(editor.baseline()["vWA"].status(), AlleleStatus::Homozygous);
    }

    #[test]
    #[should_panic(expected = "Contract")]
    fn test_set_allele_outside_editing_panics() {
        let mut editor = editor();
        editor.set_allele("vWA", AlleleSlot::First, "12");
    }

    #[test]
    fn test_try_set_allele_reports_contract_violation() {
        let mut editor = editor();
        let err = editor
            .try_set_allele("vWA", AlleleSlot::First, "12")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Contract);
        assert_eq!(editor.state(), EditorState::Viewing);
    }

    #[test]
    fn test_cancel_restores_baseline() {
        let mut editor = editor();
        editor.begin_edit().unwrap();
        editor.set_allele("D3S1358", AlleleSlot::First, "12");
        assert!(editor.has_unsaved_changes());
        editor.cancel_edit().unwrap();
        assert_eq!(editor.state(), EditorState::Viewing);
        assert_eq!(editor.buffer(), editor.baseline());
    }

    #[test]
    fn test_save_sends_full_buffer_and_commits() {
        let mut editor = editor();
        let mut notices = NoticeBoard::default();
        editor.begin_edit().unwrap();
        editor.set_allele("D3S1358", AlleleSlot::First, "12");
        let update = editor.begin_save().unwrap();
        assert_eq!(editor.state(), EditorState::Saving);
        assert_eq!(update.sample_id, "sample-1");
        assert_eq!(update.alleles.len(), 2);
        assert_eq!(update.alleles["vWA"].homozygote, Some(true));
        assert!(editor.begin_edit().is_err());

        editor.finish_save(Ok(()), &mut notices).unwrap();
        assert_eq!(editor.state(), EditorState::Viewing);
        assert!(!editor.has_unsaved_changes());
        assert_eq!(
            editor.baseline()["D3S1358"].allele(AlleleSlot::First),
            Some("12")
        );
        assert!(matches!(notices.active()[0].kind, NoticeKind::Saved { .. }));
    }

    #[test]
    fn test_failed_save_keeps_buffer_and_notifies_once() {
        let mut editor = editor();
        let mut notices = NoticeBoard::default();
        editor.begin_edit().unwrap();
        editor.set_allele("D3S1358", AlleleSlot::First, "12");
        editor.set_allele("D3S1358", AlleleSlot::Second, "14");
        let before = editor.buffer().clone();
        editor.begin_save().unwrap();
        editor
            .finish_save(Err(RemoteError::status(500, "disk full")), &mut notices)
            .unwrap();

        assert_eq!(editor.state(), EditorState::Editing);
        assert_eq!(editor.buffer(), &before);
        assert_eq!(editor.buffer()["D3S1358"].label(), "12/14");
        assert_eq!(editor.baseline()["D3S1358"].label(), "15/16");
        assert_eq!(
            notices.count_matching(|k| matches!(k, NoticeKind::SaveFailed { .. })),
            1
        );
        assert_eq!(notices.active().len(), 1);
        assert!(editor.finish_save(Ok(()), &mut notices).is_err());
        assert_eq!(notices.active().len(), 1);
    }

    #[test]
    fn test_diff_lists_changed_markers() {
        let mut editor = editor();
        editor.begin_edit().unwrap();
        editor.set_allele("D3S1358", AlleleSlot::Second, "18");
        editor.set_allele("FGA", AlleleSlot::First, "22");
        let diff = editor.diff();
        assert_eq!(diff.len(), 2);
        assert_eq!(diff[0].marker, "D3S1358");
        assert_eq!(diff[0].before[1].as_deref(), Some("16"));
        assert_eq!(diff[0].after[1].as_deref(), Some("18"));
        assert_eq!(diff[1].marker, "FGA");
        assert_eq!(diff[1].before, [None, None]);
    }
}
