//! Wires the store, the view controller, the allele editor and the notice board for one open
//! sample view. Network work runs on worker threads; results come back over a channel and are
//! applied in [`SampleSession::poll`] on the caller's thread.

use serde::Serialize;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::allele_editor::{AlleleEditor, EditorState};
use crate::error::{ErrorCode, ViewerError};
use crate::layers::TraceLayers;
use crate::loader::{CancelFlag, LoadOutcome, LoadTicket, load_sample};
use crate::marker_catalog::MarkerCatalog;
use crate::notice::{NoticeBoard, NoticeKind};
use crate::remote::{RemoteError, SampleStore};
use crate::sample::SampleModel;
use crate::size_standard::SizeLadderCatalog;
use crate::view_state::{SignalToggleMode, ViewController, ViewOp};

enum WorkerMessage {
    Loaded {
        ticket: LoadTicket,
        result: Result<LoadOutcome, RemoteError>,
    },
    Saved {
        ticket: LoadTicket,
        result: Result<(), RemoteError>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Loaded { ticket: LoadTicket },
    LoadFailed { ticket: LoadTicket, message: String },
    StaleDiscarded { ticket: LoadTicket },
    SaveFinished { ticket: LoadTicket, ok: bool },
    /// A save for a sample that is no longer shown came back; nothing was touched.
    SaveIgnored { ticket: LoadTicket, ok: bool },
}

#[derive(Clone, Debug, PartialEq)]
enum LoadState {
    Idle,
    Loading,
    Loaded,
    Failed(ViewerError),
}

pub struct SampleSession {
    store: Arc<dyn SampleStore>,
    ladders: Arc<SizeLadderCatalog>,
    view: ViewController,
    notices: NoticeBoard,
    model: Option<Arc<SampleModel>>,
    editor: Option<AlleleEditor>,
    current: Option<LoadTicket>,
    load_state: LoadState,
    cancel: Option<CancelFlag>,
    save_in_flight: Option<LoadTicket>,
    next_generation: u64,
    tx: Sender<WorkerMessage>,
    rx: Receiver<WorkerMessage>,
}

impl SampleSession {
    pub fn new(
        store: Arc<dyn SampleStore>,
        catalog: Arc<MarkerCatalog>,
        ladders: Arc<SizeLadderCatalog>,
        mode: SignalToggleMode,
        default_threshold: f64,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            store,
            ladders,
            view: ViewController::new(catalog, mode, default_threshold),
            notices: NoticeBoard::default(),
            model: None,
            editor: None,
            current: None,
            load_state: LoadState::Idle,
            cancel: None,
            save_in_flight: None,
            next_generation: 0,
            tx,
            rx,
        }
    }

    pub fn model(&self) -> Option<&Arc<SampleModel>> {
        self.model.as_ref()
    }

    pub fn current_ticket(&self) -> Option<&LoadTicket> {
        self.current.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.load_state == LoadState::Loading
    }

    pub fn view(&self) -> &ViewController {
        &self.view
    }

    pub fn layers(&self) -> &TraceLayers {
        self.view.layers()
    }

    pub fn apply_view(&mut self, op: ViewOp) -> Result<&TraceLayers, ViewerError> {
        self.view.apply(op)
    }

    pub fn editor(&self) -> Option<&AlleleEditor> {
        self.editor.as_ref()
    }

    pub fn editor_mut(&mut self) -> Option<&mut AlleleEditor> {
        self.editor.as_mut()
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn dismiss_notice(&mut self, id: u64) -> bool {
        self.notices.dismiss(id)
    }

    /// Starts loading `sample_id`, superseding any load still in flight. The previous sample is
    /// dropped from view right away, together with its notices. A save still running for it is
    /// left to finish on the store, but its outcome is ignored.
    pub fn request_load(&mut self, sample_id: &str) -> LoadTicket {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(abandoned) = self.save_in_flight.take() {
            info!(
                sample_id = abandoned.sample_id.as_str(),
                "detaching save in flight for the previous sample"
            );
        }
        self.notices.clear();
        self.next_generation += 1;
        let ticket = LoadTicket {
            sample_id: sample_id.trim().to_string(),
            generation: self.next_generation,
        };
        info!(
            sample_id = ticket.sample_id.as_str(),
            generation = ticket.generation,
            "load requested"
        );
        let cancel = CancelFlag::default();
        self.cancel = Some(cancel.clone());
        self.current = Some(ticket.clone());
        self.load_state = LoadState::Loading;
        self.model = None;
        self.editor = None;
        self.view.set_model(None);

        let store = self.store.clone();
        let ladders = self.ladders.clone();
        let tx = self.tx.clone();
        let worker_ticket = ticket.clone();
        thread::spawn(move || {
            let result = load_sample(
                store.as_ref(),
                &worker_ticket.sample_id,
                &ladders,
                &cancel,
            );
            // The session may be gone; nobody is left to tell.
            let _ = tx.send(WorkerMessage::Loaded {
                ticket: worker_ticket,
                result,
            });
        });
        ticket
    }

    /// Sends the editor's full buffer to the store on a worker thread.
    pub fn request_save(&mut self) -> Result<(), ViewerError> {
        let ticket = self
            .current
            .clone()
            .filter(|_| self.load_state == LoadState::Loaded)
            .ok_or_else(|| ViewerError::new(ErrorCode::Contract, "No sample is loaded"))?;
        let editor = self
            .editor
            .as_mut()
            .ok_or_else(|| ViewerError::new(ErrorCode::Contract, "No sample is loaded"))?;
        let update = editor.begin_save()?;
        self.save_in_flight = Some(ticket.clone());
        let store = self.store.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = store.put_alleles(&update);
            let _ = tx.send(WorkerMessage::Saved { ticket, result });
        });
        Ok(())
    }

    /// Applies every finished worker result without blocking.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        let mut events = vec![];
        while let Ok(message) = self.rx.try_recv() {
            events.push(self.handle(message));
        }
        events
    }

    /// Blocks until the current load resolves or `timeout` passes.
    pub fn wait_for_load(&mut self, timeout: Duration) -> Result<Arc<SampleModel>, ViewerError> {
        let deadline = Instant::now() + timeout;
        loop {
            match &self.load_state {
                LoadState::Loaded => {
                    return self
                        .model
                        .clone()
                        .ok_or_else(|| ViewerError::new(ErrorCode::Internal, "Loaded without a model"));
                }
                LoadState::Failed(e) => return Err(e.clone()),
                LoadState::Idle => {
                    return Err(ViewerError::new(ErrorCode::Contract, "No load was requested"));
                }
                LoadState::Loading => {}
            }
            self.wait_one(deadline, "loading the sample")?;
        }
    }

    /// Blocks until the save in flight is acknowledged or rejected.
    pub fn wait_for_save(&mut self, timeout: Duration) -> Result<(), ViewerError> {
        let deadline = Instant::now() + timeout;
        while self.save_in_flight.is_some() {
            self.wait_one(deadline, "saving allele calls")?;
        }
        match self.editor.as_ref().map(AlleleEditor::state) {
            Some(EditorState::Viewing) => Ok(()),
            _ => Err(ViewerError::new(
                ErrorCode::Transport,
                "Saving allele calls failed; edits are kept",
            )),
        }
    }

    fn wait_one(&mut self, deadline: Instant, what: &str) -> Result<(), ViewerError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(remaining) {
            Ok(message) => {
                self.handle(message);
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(ViewerError::new(
                ErrorCode::Transport,
                format!("Timed out {what}"),
            )),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ViewerError::new(ErrorCode::Internal, "Worker channel closed"))
            }
        }
    }

    fn handle(&mut self, message: WorkerMessage) -> SessionEvent {
        match message {
            WorkerMessage::Loaded { ticket, result } => {
                if self.current.as_ref() != Some(&ticket) {
                    info!(
                        sample_id = ticket.sample_id.as_str(),
                        generation = ticket.generation,
                        "discarding stale load result"
                    );
                    return SessionEvent::StaleDiscarded { ticket };
                }
                self.cancel = None;
                match result {
                    Ok(outcome) => {
                        for (channel, reason) in outcome.unavailable {
                            self.notices.push(
                                NoticeKind::ChannelUnavailable {
                                    sample_id: ticket.sample_id.clone(),
                                    channel,
                                },
                                format!("No data for {channel}: {reason}"),
                            );
                        }
                        let model = Arc::new(outcome.model);
                        self.editor = Some(AlleleEditor::new(
                            &ticket.sample_id,
                            model.alleles().clone(),
                        ));
                        self.view.set_model(Some(model.clone()));
                        self.model = Some(model);
                        self.load_state = LoadState::Loaded;
                        info!(sample_id = ticket.sample_id.as_str(), "load completed");
                        SessionEvent::Loaded { ticket }
                    }
                    Err(e) => {
                        warn!(sample_id = ticket.sample_id.as_str(), error = %e, "load failed");
                        let message = e.to_string();
                        self.notices.push(
                            NoticeKind::LoadFailed {
                                sample_id: ticket.sample_id.clone(),
                            },
                            format!("Could not load sample: {message}"),
                        );
                        self.load_state = LoadState::Failed(e.into());
                        SessionEvent::LoadFailed { ticket, message }
                    }
                }
            }
            WorkerMessage::Saved { ticket, result } => {
                let ok = result.is_ok();
                if self.save_in_flight.as_ref() != Some(&ticket) {
                    info!(
                        sample_id = ticket.sample_id.as_str(),
                        ok, "ignoring save outcome for a sample no longer shown"
                    );
                    return SessionEvent::SaveIgnored { ticket, ok };
                }
                self.save_in_flight = None;
                if let Some(editor) = self.editor.as_mut() {
                    if let Err(e) = editor.finish_save(result, &mut self.notices) {
                        warn!(error = %e, "save outcome arrived in an unexpected editor state");
                    }
                    if ok {
                        let baseline = editor.baseline().clone();
                        if let Some(model) = self.model.as_mut() {
                            Arc::make_mut(model).replace_alleles(baseline);
                            self.view.set_model(Some(model.clone()));
                        }
                    }
                }
                SessionEvent::SaveFinished { ticket, ok }
            }
        }
    }

    /// Abandons in-flight work. Workers finish on their own and their results go nowhere.
    pub fn close(self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        info!(
            sample_id = self.current.as_ref().map(|t| t.sample_id.as_str()),
            save_in_flight = self.save_in_flight.is_some(),
            "session closed"
        );
    }
}
