// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{MonotonicClock, TimerQueue};
use crate::mappings::{self, Resolver};
use crate::midi;
use crate::notes::{ActiveNote, InstanceId, NoteDispatcher, TimerTask};
use crate::project::{
    GlobalAction, GlobalMapping, InputMapping, MappingAction, Project, Scene, Song,
};
use crate::voices::VoiceLedger;

mod presets;
mod sequences;

use sequences::StepState;

/// How many commands may wait for the engine before the overflow policy
/// kicks in.
const COMMAND_QUEUE_DEPTH: usize = 64;

/// Where a trigger came from.
#[derive(Clone, Debug)]
pub enum TriggerInput {
    Keyboard { value: String },
    /// The channel is 1..=16.
    Midi { pitch: u8, channel: u8 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerEdge {
    Press,
    Release,
}

/// A press or release of a physical trigger. Callers are expected to filter
/// key auto-repeat before submitting.
#[derive(Clone, Debug)]
pub struct TriggerEvent {
    pub input: TriggerInput,
    pub edge: TriggerEdge,
}

impl TriggerEvent {
    pub fn keyboard(value: &str, edge: TriggerEdge) -> TriggerEvent {
        TriggerEvent {
            input: TriggerInput::Keyboard {
                value: value.to_string(),
            },
            edge,
        }
    }

    pub fn midi(pitch: u8, channel: u8, edge: TriggerEdge) -> TriggerEvent {
        TriggerEvent {
            input: TriggerInput::Midi { pitch, channel },
            edge,
        }
    }
}

/// All mutable performance state, owned by one logical executor. Every
/// mutation and every output-port call happens through these methods, either
/// while handling an event or while running a due task.
pub(crate) struct EngineState {
    pub(crate) project: Project,
    pub(crate) current_song: usize,
    /// Scene switches made during the performance, by song id. Falls back
    /// to the song's own active scene until a switch happens.
    pub(crate) active_scenes: HashMap<String, String>,
    pub(crate) timers: TimerQueue<TimerTask>,
    pub(crate) voices: VoiceLedger,
    pub(crate) notes: NoteDispatcher,
    /// The instance currently authoritative for each preset or sequence.
    pub(crate) owners: HashMap<String, InstanceId>,
    pub(crate) steps: StepState,
    /// Set when the voice ledger reports a broken invariant; the engine
    /// panics once the current dispatch unwinds.
    pub(crate) panic_pending: bool,
}

impl EngineState {
    pub(crate) fn new(project: Project, output: Option<Arc<dyn midi::Device>>) -> EngineState {
        EngineState {
            current_song: 0,
            active_scenes: HashMap::new(),
            timers: TimerQueue::new(),
            voices: VoiceLedger::new(output),
            notes: NoteDispatcher::new(),
            owners: HashMap::new(),
            steps: StepState::default(),
            panic_pending: false,
            project,
        }
    }

    pub(crate) fn current_song(&self) -> Option<Arc<Song>> {
        self.project.songs.get(self.current_song).cloned()
    }

    fn active_scene(&self, song: &Song) -> Option<Arc<Scene>> {
        let scene_id = self
            .active_scenes
            .get(&song.id)
            .cloned()
            .or_else(|| song.active_scene_id.clone())?;
        song.scenes.get(&scene_id).cloned()
    }

    /// Routes one trigger event: every matching input mapping is dispatched
    /// in definition order, then matching global mappings fire on press.
    pub(crate) fn handle_event(&mut self, event: &TriggerEvent, now: u64) {
        let song = match self.current_song() {
            Some(song) => song,
            None => return,
        };
        let scene = self.active_scene(&song);
        // The scene filter applies at press time only: a release must find
        // its mapping even if its scene has since been left.
        let apply_scene = event.edge == TriggerEdge::Press;
        let resolver = Resolver::new(&song, scene.as_deref());

        let (matched, trigger_value) = match &event.input {
            TriggerInput::Keyboard { value } => {
                let value = value.trim().to_lowercase();
                (resolver.match_keyboard(&value, apply_scene), value)
            }
            TriggerInput::Midi { pitch, channel } => (
                resolver.match_midi(*pitch, *channel, apply_scene),
                pitch.to_string(),
            ),
        };
        if matched.is_empty() {
            debug!(event = format!("{:?}", event), "No mapping matched.");
        }
        for mapping in matched {
            self.apply_mapping(&song, &mapping, &trigger_value, event.edge, now);
        }

        if event.edge == TriggerEdge::Press {
            let globals: Vec<GlobalMapping> = match &event.input {
                TriggerInput::Keyboard { value } => {
                    mappings::match_global_keyboard(&self.project.global_mappings, value)
                }
                TriggerInput::Midi { pitch, channel } => {
                    mappings::match_global_midi(&self.project.global_mappings, *pitch, *channel)
                }
            }
            .into_iter()
            .cloned()
            .collect();
            for mapping in globals {
                self.apply_global(&mapping, now);
            }
        }

        if self.panic_pending {
            self.panic();
        }
    }

    fn apply_mapping(
        &mut self,
        song: &Arc<Song>,
        mapping: &Arc<InputMapping>,
        trigger_value: &str,
        edge: TriggerEdge,
        now: u64,
    ) {
        let instance = InstanceId::new(&mapping.id, trigger_value);
        match mapping.action {
            MappingAction::Preset => {
                let preset = match song.presets.get(&mapping.target_id) {
                    Some(preset) => preset.clone(),
                    None => {
                        debug!(
                            target_id = mapping.target_id,
                            "Mapping targets unknown preset."
                        );
                        return;
                    }
                };
                let source_id = preset.id.clone();
                match edge {
                    TriggerEdge::Press => {
                        self.open_preset(&preset, &instance, song.bpm, None, &source_id, now)
                    }
                    TriggerEdge::Release => {
                        self.close_preset(&preset, &instance, false, &source_id, now)
                    }
                }
            }
            MappingAction::Sequence => {
                let sequence = match song.sequences.get(&mapping.target_id) {
                    Some(sequence) => sequence.clone(),
                    None => {
                        debug!(
                            target_id = mapping.target_id,
                            "Mapping targets unknown sequence."
                        );
                        return;
                    }
                };
                match edge {
                    TriggerEdge::Press => self.sequence_press(&sequence, &instance, now),
                    TriggerEdge::Release => self.sequence_release(&sequence, &instance, now),
                }
            }
            MappingAction::SwitchScene => {
                // Press only. Held notes from the leaving scene are not
                // silenced; their releases stay routable.
                if edge != TriggerEdge::Press {
                    return;
                }
                if song.scenes.contains_key(&mapping.target_id) {
                    info!(scene = mapping.target_id, "Switching scene.");
                    self.active_scenes
                        .insert(song.id.clone(), mapping.target_id.clone());
                } else {
                    debug!(target_id = mapping.target_id, "Mapping targets unknown scene.");
                }
            }
        }
    }

    fn apply_global(&mut self, mapping: &GlobalMapping, now: u64) {
        match &mapping.action {
            GlobalAction::NextSong => self.select_song_index(self.current_song.saturating_add(1)),
            GlobalAction::PrevSong => self.select_song_index(self.current_song.saturating_sub(1)),
            GlobalAction::GotoSong(number) => match number.checked_sub(1) {
                Some(index) if index < self.project.songs.len() => self.select_song_index(index),
                _ => debug!(number, "Song number out of range."),
            },
            GlobalAction::ResetSequences => self.reset_sequences(now),
        }
    }

    fn select_song_index(&mut self, index: usize) {
        if self.project.songs.is_empty() {
            return;
        }
        let index = index.min(self.project.songs.len() - 1);
        if index != self.current_song {
            info!(song = self.project.songs[index].name, "Switching song.");
        }
        self.current_song = index;
    }

    pub(crate) fn select_song(&mut self, song_id: &str) {
        match self.project.song_index(song_id) {
            Some(index) => self.select_song_index(index),
            None => debug!(song = song_id, "Unknown song."),
        }
    }

    pub(crate) fn select_scene(&mut self, scene_id: &str) {
        let song = match self.current_song() {
            Some(song) => song,
            None => return,
        };
        if song.scenes.contains_key(scene_id) {
            self.active_scenes
                .insert(song.id.clone(), scene_id.to_string());
        } else {
            debug!(scene = scene_id, "Unknown scene.");
        }
    }

    /// Executes every task due at or before the given time. Tasks scheduled
    /// by other tasks at the same instant run in the same pass.
    pub(crate) fn run_due(&mut self, now: u64) {
        while let Some(task) = self.timers.pop_due(now) {
            match task {
                TimerTask::NoteOn(key) => self.notes.fire_on(&mut self.voices, &key, now),
                TimerTask::NoteOff(key) => {
                    if self.notes.fire_off(&mut self.voices, &key, now) {
                        self.panic_pending = true;
                    }
                }
                TimerTask::SequenceItem {
                    seq_id,
                    item,
                    instance,
                    bpm,
                } => self.start_sequence_item(&seq_id, item, &instance, bpm, now),
                TimerTask::GlissandoStep {
                    channel,
                    pitch,
                    velocity,
                    hold_ms,
                } => {
                    self.voices.acquire(channel, pitch, velocity);
                    self.timers.schedule(
                        now + hold_ms.max(1),
                        TimerTask::GlissandoRelease { channel, pitch },
                    );
                }
                TimerTask::GlissandoRelease { channel, pitch } => {
                    if self.voices.release(channel, pitch, now) {
                        self.panic_pending = true;
                    }
                }
            }
        }
        if self.panic_pending {
            self.panic();
        }
    }

    /// Silences everything and drops all runtime state. The data model and
    /// the scene selection survive.
    pub(crate) fn panic(&mut self) {
        warn!("Panic: silencing all voices and dropping runtime state.");
        self.voices.clear_all();
        self.timers.clear();
        self.notes.clear();
        self.owners.clear();
        self.steps.clear();
        self.panic_pending = false;
    }

    /// Releases every sequence's sustained notes and rewinds all stepping
    /// state. Already-scheduled tasks still run; the ledger keeps the wire
    /// well-formed.
    pub(crate) fn reset_sequences(&mut self, now: u64) {
        info!("Resetting sequences.");
        if self
            .notes
            .stop_sustained_sources(&mut self.timers, &mut self.voices, now)
        {
            self.panic_pending = true;
        }
        self.steps.clear();
        self.owners.clear();
    }

    pub(crate) fn active_notes(&self) -> Vec<ActiveNote> {
        self.notes.active_notes()
    }

    /// Step positions for the current song's sequences; -1 means the
    /// sequence is ready at the top.
    pub(crate) fn step_positions(&self) -> HashMap<String, i32> {
        let mut positions = HashMap::new();
        if let Some(song) = self.project.songs.get(self.current_song) {
            for id in song.sequences.keys() {
                positions.insert(id.clone(), self.steps.position(id));
            }
        }
        positions
    }
}

enum Command {
    Trigger(TriggerEvent),
    Panic,
    ResetSequences,
    SelectSong(String),
    SelectScene(String),
    Shutdown,
}

#[derive(Default)]
struct Shared {
    active_notes: parking_lot::Mutex<Vec<ActiveNote>>,
    step_positions: parking_lot::Mutex<HashMap<String, i32>>,
}

/// The trigger-to-MIDI engine. All state lives on a single tokio task that
/// drains submitted events between timer deadlines; the handle here is cheap
/// to share with input drivers and a UI.
pub struct Engine {
    commands: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Creates the engine and starts its task. Must be called within a
    /// tokio runtime.
    pub fn new(project: Project, output: Option<Arc<dyn midi::Device>>) -> Engine {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let shared = Arc::new(Shared::default());
        let state = EngineState::new(project, output);
        let handle = {
            let shared = shared.clone();
            tokio::spawn(async move { Engine::run(state, commands_rx, shared).await })
        };
        Engine {
            commands: commands_tx,
            shared,
            handle: parking_lot::Mutex::new(Some(handle)),
        }
    }

    async fn run(
        mut state: EngineState,
        mut commands: mpsc::Receiver<Command>,
        shared: Arc<Shared>,
    ) {
        let clock = MonotonicClock::new();
        info!("Engine started.");

        loop {
            let now = clock.now_ms();
            state.run_due(now);
            Engine::publish(&state, &shared);

            let deadline = state.timers.next_deadline();
            let command = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => Some(command),
                    None => break,
                },
                _ = Engine::sleep_until(&clock, deadline) => None,
            };

            if let Some(command) = command {
                let now = clock.now_ms();
                match command {
                    Command::Trigger(event) => state.handle_event(&event, now),
                    Command::Panic => state.panic(),
                    Command::ResetSequences => state.reset_sequences(now),
                    Command::SelectSong(id) => state.select_song(&id),
                    Command::SelectScene(id) => state.select_scene(&id),
                    Command::Shutdown => break,
                }
            }
        }

        // Going away: leave no voice sounding and no task armed.
        state.panic();
        Engine::publish(&state, &shared);
        info!("Engine stopped.");
    }

    async fn sleep_until(clock: &MonotonicClock, deadline: Option<u64>) {
        match deadline {
            Some(at) => tokio::time::sleep_until(clock.instant_at(at)).await,
            None => std::future::pending::<()>().await,
        }
    }

    fn publish(state: &EngineState, shared: &Shared) {
        *shared.active_notes.lock() = state.active_notes();
        *shared.step_positions.lock() = state.step_positions();
    }

    /// Submits a trigger event.
    pub async fn submit(&self, event: TriggerEvent) {
        if self.commands.send(Command::Trigger(event)).await.is_err() {
            warn!("Engine is gone, dropping event.");
        }
    }

    /// Submits a trigger event from a non-async thread. When the queue is
    /// full, presses are dropped; releases always block until queued so
    /// notes cannot stick.
    pub fn submit_blocking(&self, event: TriggerEvent) {
        let release = event.edge == TriggerEdge::Release;
        match self.commands.try_send(Command::Trigger(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                if release {
                    if self.commands.blocking_send(command).is_err() {
                        warn!("Engine is gone, dropping release.");
                    }
                } else {
                    warn!("Event queue is full, dropping press.");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Engine is gone, dropping event.");
            }
        }
    }

    /// Silences everything immediately and resets runtime state.
    pub async fn panic(&self) {
        let _ = self.commands.send(Command::Panic).await;
    }

    /// Rewinds all sequences and releases their sustained notes.
    pub async fn reset_sequences(&self) {
        let _ = self.commands.send(Command::ResetSequences).await;
    }

    pub async fn set_current_song(&self, song_id: &str) {
        let _ = self
            .commands
            .send(Command::SelectSong(song_id.to_string()))
            .await;
    }

    pub async fn set_active_scene(&self, scene_id: &str) {
        let _ = self
            .commands
            .send(Command::SelectScene(scene_id.to_string()))
            .await;
    }

    /// The notes currently sounding, as of the engine's last pass.
    pub fn observe_active_notes(&self) -> Vec<ActiveNote> {
        self.shared.active_notes.lock().clone()
    }

    /// Step positions for the current song's sequences; -1 means ready.
    pub fn observe_step_positions(&self) -> HashMap<String, i32> {
        self.shared.step_positions.lock().clone()
    }

    /// Stops the engine task. All voices are silenced on the way out.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
