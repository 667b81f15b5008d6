use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use engine::{EntityId, InputSnapshot, Vec3};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::nav::ground_distance;

pub(crate) const START_PASSAGE: &str = "START";
pub(crate) const END_PASSAGE: &str = "END";
pub(crate) const EXIT_PASSAGE: &str = "EXIT";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DialogueOption {
    pub(crate) text: String,
    /// Passage this option leads to.
    #[serde(rename = "id")]
    pub(crate) target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Passage {
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) options: Vec<DialogueOption>,
}

impl Passage {
    fn is_terminal(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub(crate) struct DialogueGraph {
    passages: HashMap<String, Passage>,
}

impl DialogueGraph {
    pub(crate) fn passage(&self, id: &str) -> Option<&Passage> {
        self.passages.get(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.passages.len()
    }
}

#[derive(Debug, Error)]
pub(crate) enum DialogueLoadError {
    #[error("failed to read dialogue file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse dialogue file {path} at {location}: {message}")]
    Parse {
        path: PathBuf,
        location: String,
        message: String,
    },
    #[error("dialogue loader for {path} stopped before delivering a graph")]
    LoaderGone { path: PathBuf },
}

pub(crate) fn parse_dialogue_graph(raw: &str, path: &Path) -> Result<DialogueGraph, DialogueLoadError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize::<_, DialogueGraph>(&mut deserializer).map_err(|error| {
        let location = error.path().to_string();
        let source = error.into_inner();
        DialogueLoadError::Parse {
            path: path.to_path_buf(),
            location: if location.is_empty() {
                ".".to_string()
            } else {
                location
            },
            message: source.to_string(),
        }
    })
}

pub(crate) fn load_dialogue_graph(path: &Path) -> Result<DialogueGraph, DialogueLoadError> {
    let raw = fs::read_to_string(path).map_err(|source| DialogueLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_dialogue_graph(&raw, path)
}

pub(crate) type PendingGraph = Receiver<Result<DialogueGraph, DialogueLoadError>>;

/// Loads the graph off the tick thread; poll the receiver with `try_recv`.
pub(crate) fn spawn_dialogue_load(path: PathBuf) -> PendingGraph {
    let (sender, receiver) = mpsc::channel();
    let fallback_sender = sender.clone();
    let thread_path = path.clone();
    let spawned = thread::Builder::new()
        .name("dialogue-loader".to_string())
        .spawn(move || {
            let _ = sender.send(load_dialogue_graph(&thread_path));
        });
    if let Err(error) = spawned {
        warn!(error = %error, path = %path.display(), "dialogue_loader_spawn_failed");
        let _ = fallback_sender.send(load_dialogue_graph(&path));
    }
    receiver
}

/// What the UI layer is asked to show for the active passage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PassageView {
    pub(crate) passage_id: String,
    pub(crate) text: String,
    pub(crate) options: Vec<String>,
    pub(crate) focus: Option<usize>,
}

pub(crate) trait DialoguePresenter {
    fn render(&mut self, speaker: EntityId, view: &PassageView);
    fn clear(&mut self, speaker: EntityId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DialogueEvent {
    Opened,
    Ended,
    Exited,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenOutcome {
    Opened,
    /// The graph is still loading; the dialogue opens once it arrives.
    Queued,
    TooFar,
    AlreadyOpen,
    Unavailable,
}

enum GraphSlot {
    Loading { path: PathBuf, pending: PendingGraph },
    Ready(DialogueGraph),
    Failed,
}

pub(crate) struct DialogueEngine {
    slot: GraphSlot,
    open: bool,
    open_queued: bool,
    active: Option<String>,
    focus: Option<usize>,
    events: Vec<DialogueEvent>,
}

impl DialogueEngine {
    pub(crate) fn loading(path: PathBuf, pending: PendingGraph) -> Self {
        Self::with_slot(GraphSlot::Loading { path, pending })
    }

    #[cfg(test)]
    pub(crate) fn ready(graph: DialogueGraph) -> Self {
        Self::with_slot(GraphSlot::Ready(graph))
    }

    fn with_slot(slot: GraphSlot) -> Self {
        Self {
            slot,
            open: false,
            open_queued: false,
            active: None,
            focus: None,
            events: Vec::new(),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    #[cfg(test)]
    pub(crate) fn is_ready(&self) -> bool {
        matches!(self.slot, GraphSlot::Ready(_))
    }

    pub(crate) fn is_loading(&self) -> bool {
        matches!(self.slot, GraphSlot::Loading { .. })
    }

    #[cfg(test)]
    pub(crate) fn is_open_queued(&self) -> bool {
        self.open_queued
    }

    #[cfg(test)]
    pub(crate) fn active_passage(&self) -> Option<&str> {
        self.active.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn focus(&self) -> Option<usize> {
        self.focus
    }

    pub(crate) fn drain_events(&mut self) -> Vec<DialogueEvent> {
        std::mem::take(&mut self.events)
    }

    /// Picks up a finished background load. A queued open request is served
    /// as soon as the graph lands, provided the player is still within
    /// `speak_distance`; otherwise it is dropped.
    pub(crate) fn poll_loader(
        &mut self,
        owner: EntityId,
        owner_position: Vec3,
        player_position: Option<Vec3>,
        speak_distance: f32,
        presenter: &mut dyn DialoguePresenter,
    ) {
        let GraphSlot::Loading { path, pending } = &self.slot else {
            return;
        };
        let outcome = match pending.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => {
                Err(DialogueLoadError::LoaderGone { path: path.clone() })
            }
        };

        match outcome {
            Ok(graph) => {
                info!(speaker = %owner, passages = graph.len(), "dialogue_loaded");
                self.slot = GraphSlot::Ready(graph);
                if std::mem::take(&mut self.open_queued) {
                    let in_range = player_position.is_some_and(|player| {
                        ground_distance(owner_position, player) <= speak_distance
                    });
                    if in_range {
                        self.begin(owner, presenter);
                    } else {
                        debug!(speaker = %owner, "dialogue_open_dropped");
                    }
                }
            }
            Err(error) => {
                warn!(speaker = %owner, error = %error, "dialogue_load_failed");
                self.slot = GraphSlot::Failed;
                self.open_queued = false;
            }
        }
    }

    pub(crate) fn request_open(
        &mut self,
        owner: EntityId,
        owner_position: Vec3,
        player_position: Vec3,
        speak_distance: f32,
        presenter: &mut dyn DialoguePresenter,
    ) -> OpenOutcome {
        if self.open {
            return OpenOutcome::AlreadyOpen;
        }
        if ground_distance(owner_position, player_position) > speak_distance {
            return OpenOutcome::TooFar;
        }
        match self.slot {
            GraphSlot::Ready(_) => {
                self.begin(owner, presenter);
                OpenOutcome::Opened
            }
            GraphSlot::Loading { .. } => {
                info!(speaker = %owner, "dialogue_open_queued");
                self.open_queued = true;
                OpenOutcome::Queued
            }
            GraphSlot::Failed => {
                warn!(speaker = %owner, "dialogue_unavailable");
                OpenOutcome::Unavailable
            }
        }
    }

    fn begin(&mut self, owner: EntityId, presenter: &mut dyn DialoguePresenter) {
        self.open = true;
        self.events.push(DialogueEvent::Opened);
        self.visit(START_PASSAGE, owner, presenter);
    }

    fn visit(&mut self, passage_id: &str, owner: EntityId, presenter: &mut dyn DialoguePresenter) {
        let GraphSlot::Ready(graph) = &self.slot else {
            self.close(owner, presenter);
            return;
        };
        let Some(passage) = graph.passage(passage_id).cloned() else {
            warn!(speaker = %owner, passage = passage_id, "dialogue_passage_missing");
            self.close(owner, presenter);
            return;
        };

        if passage.is_terminal() {
            match passage_id {
                END_PASSAGE => self.events.push(DialogueEvent::Ended),
                EXIT_PASSAGE => self.events.push(DialogueEvent::Exited),
                _ => debug!(speaker = %owner, passage = passage_id, "dialogue_silent_terminal"),
            }
            self.close(owner, presenter);
            return;
        }

        self.active = Some(passage_id.to_string());
        self.focus = None;
        self.render(owner, &passage, presenter);
    }

    fn render(&self, owner: EntityId, passage: &Passage, presenter: &mut dyn DialoguePresenter) {
        let Some(passage_id) = self.active.clone() else {
            return;
        };
        presenter.render(
            owner,
            &PassageView {
                passage_id,
                text: passage.text.clone(),
                options: passage
                    .options
                    .iter()
                    .map(|option| option.text.clone())
                    .collect(),
                focus: self.focus,
            },
        );
    }

    fn active_passage_data(&self) -> Option<Passage> {
        let GraphSlot::Ready(graph) = &self.slot else {
            return None;
        };
        graph.passage(self.active.as_deref()?).cloned()
    }

    /// Routes confirm, focus movement and pointer picks to the open passage.
    pub(crate) fn handle_input(
        &mut self,
        owner: EntityId,
        input: &InputSnapshot,
        presenter: &mut dyn DialoguePresenter,
    ) {
        if !self.open {
            return;
        }
        let Some(passage) = self.active_passage_data() else {
            self.close(owner, presenter);
            return;
        };
        let option_count = passage.options.len();

        if let Some(index) = input.pointer_option() {
            if let Some(option) = passage.options.get(index) {
                self.visit(&option.target, owner, presenter);
                return;
            }
            debug!(speaker = %owner, index, "dialogue_pointer_out_of_range");
        }

        let steps = input.focus_steps();
        if steps != 0 && option_count >= 2 {
            let count = option_count as i64;
            let next = match self.focus {
                Some(current) => (current as i64 + steps as i64).rem_euclid(count),
                None if steps > 0 => (steps as i64 - 1).rem_euclid(count),
                None => (steps as i64).rem_euclid(count),
            };
            self.focus = Some(next as usize);
            self.render(owner, &passage, presenter);
        }

        if !input.confirm_pressed() {
            return;
        }
        match option_count {
            0 => self.close(owner, presenter),
            1 => {
                let target = passage.options[0].target.clone();
                self.visit(&target, owner, presenter);
            }
            _ => match self.focus.and_then(|index| passage.options.get(index)) {
                Some(option) => {
                    let target = option.target.clone();
                    self.visit(&target, owner, presenter);
                }
                None => debug!(speaker = %owner, "dialogue_selection_required"),
            },
        }
    }

    pub(crate) fn close(&mut self, owner: EntityId, presenter: &mut dyn DialoguePresenter) {
        if !self.open {
            return;
        }
        self.open = false;
        self.active = None;
        self.focus = None;
        presenter.clear(owner);
        self.events.push(DialogueEvent::Closed);
    }
}
