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
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::clock::{TaskId, TimerQueue};
use crate::project::{DurationValue, NoteItem, SequenceItem};
use crate::voices::VoiceLedger;

/// One physical trigger invocation: the mapping that matched and the concrete
/// trigger value it matched on. Two MIDI pitches routed to the same preset by
/// one range mapping are distinct instances.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstanceId {
    pub mapping_id: String,
    pub trigger_value: String,
}

impl InstanceId {
    pub fn new(mapping_id: &str, trigger_value: &str) -> InstanceId {
        InstanceId {
            mapping_id: mapping_id.to_string(),
            trigger_value: trigger_value.to_string(),
        }
    }
}

/// Identifies a scheduled note within a source. A later start under the same
/// key takes the note over from whichever instance held it, so crossed
/// press/release pairs over one target cannot strand a voice.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NoteKey {
    pub source_id: String,
    pub channel: u8,
    pub pitch: u8,
}

/// Work items the engine executes when their deadline arrives. Tasks never
/// block; each one posts MIDI output and mutates engine state.
pub enum TimerTask {
    NoteOn(NoteKey),
    NoteOff(NoteKey),
    /// An AUTO-mode sequence item coming due. The tempo is resolved at
    /// schedule time.
    SequenceItem {
        seq_id: String,
        item: Arc<SequenceItem>,
        instance: InstanceId,
        bpm: f32,
    },
    /// One step of a glissando walk: sound the pitch and hold it.
    GlissandoStep {
        channel: u8,
        pitch: u8,
        velocity: f32,
        hold_ms: u64,
    },
    GlissandoRelease {
        channel: u8,
        pitch: u8,
    },
}

/// The scheduled on/off pair for one note, with the instance that owns it.
struct NoteHandle {
    instance: InstanceId,
    on: Option<TaskId>,
    off: Option<TaskId>,
    playing: bool,
    velocity: f32,
    latched: bool,
    start_ms: u64,
    duration_ms: Option<u64>,
}

/// A sounding note as observed by a UI.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveNote {
    pub channel: u8,
    pub pitch: u8,
    pub start_ms: u64,
    pub duration_ms: Option<u64>,
}

/// Schedules a note's on/off against the timer queue and keeps track of
/// which latched voices each source has started, so a step advance or a
/// release can find and terminate them.
pub struct NoteDispatcher {
    handles: HashMap<NoteKey, NoteHandle>,
    sustained: HashMap<String, HashSet<(u8, u8)>>,
}

impl NoteDispatcher {
    pub fn new() -> NoteDispatcher {
        NoteDispatcher {
            handles: HashMap::new(),
            sustained: HashMap::new(),
        }
    }

    /// Schedules the note under the given source and instance. Any prior
    /// note under the same (source, channel, pitch) is taken over: its tasks
    /// are cancelled and its voice released before the new pair is
    /// scheduled. Returns true if the ledger reports a broken invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        timers: &mut TimerQueue<TimerTask>,
        voices: &mut VoiceLedger,
        source_id: &str,
        instance: &InstanceId,
        note: &NoteItem,
        bpm: f32,
        override_duration: Option<DurationValue>,
        now: u64,
    ) -> bool {
        let key = NoteKey {
            source_id: source_id.to_string(),
            channel: note.channel,
            pitch: note.pitch,
        };
        let fatal = self.cancel_key(timers, voices, &key, now);

        let duration_ms = override_duration
            .or(note.duration)
            .map(|duration| duration.to_ms(bpm));
        let on_at = now + note.pre_delay_ms;
        let on = timers.schedule(on_at, TimerTask::NoteOn(key.clone()));
        let off = duration_ms.map(|d| timers.schedule(on_at + d, TimerTask::NoteOff(key.clone())));

        self.handles.insert(
            key,
            NoteHandle {
                instance: instance.clone(),
                on: Some(on),
                off,
                playing: false,
                velocity: note.velocity,
                latched: duration_ms.is_none(),
                start_ms: on_at,
                duration_ms,
            },
        );
        fatal
    }

    /// A scheduled note-on came due: acquire the voice and, for latched
    /// notes, record the sustained entry so the source can later end it.
    pub fn fire_on(&mut self, voices: &mut VoiceLedger, key: &NoteKey, now: u64) {
        let (latched, velocity) = match self.handles.get_mut(key) {
            Some(handle) => {
                handle.on = None;
                handle.playing = true;
                handle.start_ms = now;
                (handle.latched, handle.velocity)
            }
            None => {
                debug!(?key, "Note-on fired for a cancelled note, ignoring.");
                return;
            }
        };

        voices.acquire(key.channel, key.pitch, velocity);
        if latched {
            self.sustained
                .entry(key.source_id.clone())
                .or_default()
                .insert((key.channel, key.pitch));
        }
    }

    /// A scheduled note-off came due: release the voice and drop the handle.
    pub fn fire_off(&mut self, voices: &mut VoiceLedger, key: &NoteKey, now: u64) -> bool {
        let handle = match self.handles.remove(key) {
            Some(handle) => handle,
            None => {
                debug!(?key, "Note-off fired for a cancelled note, ignoring.");
                return false;
            }
        };

        self.remove_sustained(key);
        if handle.playing {
            voices.release(key.channel, key.pitch, now)
        } else {
            false
        }
    }

    /// Stops the note if the given instance still holds it. A stop from an
    /// instance whose note was taken over is a no-op.
    #[allow(clippy::too_many_arguments)]
    pub fn stop(
        &mut self,
        timers: &mut TimerQueue<TimerTask>,
        voices: &mut VoiceLedger,
        source_id: &str,
        instance: &InstanceId,
        channel: u8,
        pitch: u8,
        now: u64,
    ) -> bool {
        let key = NoteKey {
            source_id: source_id.to_string(),
            channel,
            pitch,
        };
        let held_by_instance = self
            .handles
            .get(&key)
            .is_some_and(|handle| &handle.instance == instance);
        if held_by_instance {
            self.cancel_key(timers, voices, &key, now)
        } else {
            false
        }
    }

    /// Silences everything the source left latched and cancels its notes
    /// that have not sounded yet. Notes with a finite duration that are
    /// already sounding keep their scheduled off.
    pub fn stop_source(
        &mut self,
        timers: &mut TimerQueue<TimerTask>,
        voices: &mut VoiceLedger,
        source_id: &str,
        now: u64,
    ) -> bool {
        let keys: Vec<NoteKey> = self
            .handles
            .iter()
            .filter(|(key, handle)| {
                key.source_id == source_id && (!handle.playing || handle.latched)
            })
            .map(|(key, _)| key.clone())
            .collect();

        let mut fatal = false;
        for key in keys {
            if self.cancel_key(timers, voices, &key, now) {
                fatal = true;
            }
        }
        self.sustained.remove(source_id);
        fatal
    }

    /// Releases every source's sustained notes. Used by sequence reset;
    /// scheduled tasks that do not belong to a sustained source still run.
    pub fn stop_sustained_sources(
        &mut self,
        timers: &mut TimerQueue<TimerTask>,
        voices: &mut VoiceLedger,
        now: u64,
    ) -> bool {
        let sources: Vec<String> = self.sustained.keys().cloned().collect();
        let mut fatal = false;
        for source in sources {
            if self.stop_source(timers, voices, &source, now) {
                fatal = true;
            }
        }
        fatal
    }

    /// Drops all handles and sustained entries without touching voices.
    /// Used only by panic, which silences the wire via the ledger.
    pub fn clear(&mut self) {
        self.handles.clear();
        self.sustained.clear();
    }

    /// The notes currently sounding, ordered by (channel, pitch).
    pub fn active_notes(&self) -> Vec<ActiveNote> {
        let mut notes: Vec<ActiveNote> = self
            .handles
            .iter()
            .filter(|(_, handle)| handle.playing)
            .map(|(key, handle)| ActiveNote {
                channel: key.channel,
                pitch: key.pitch,
                start_ms: handle.start_ms,
                duration_ms: handle.duration_ms,
            })
            .collect();
        notes.sort_by_key(|note| (note.channel, note.pitch));
        notes
    }

    /// The number of latched voices recorded for the source.
    pub fn sustained_count(&self, source_id: &str) -> usize {
        self.sustained.get(source_id).map_or(0, |set| set.len())
    }

    fn cancel_key(
        &mut self,
        timers: &mut TimerQueue<TimerTask>,
        voices: &mut VoiceLedger,
        key: &NoteKey,
        now: u64,
    ) -> bool {
        let handle = match self.handles.remove(key) {
            Some(handle) => handle,
            None => return false,
        };
        if let Some(on) = handle.on {
            timers.cancel(on);
        }
        if let Some(off) = handle.off {
            timers.cancel(off);
        }
        self.remove_sustained(key);
        if handle.playing {
            voices.release(key.channel, key.pitch, now)
        } else {
            false
        }
    }

    fn remove_sustained(&mut self, key: &NoteKey) {
        if let Some(set) = self.sustained.get_mut(&key.source_id) {
            set.remove(&(key.channel, key.pitch));
            if set.is_empty() {
                self.sustained.remove(&key.source_id);
            }
        }
    }
}

impl Default for NoteDispatcher {
    fn default() -> Self {
        NoteDispatcher::new()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::midi::mock::{Device, Message};
    use crate::project::{DurationUnit, DurationValue, NoteItem};

    use super::*;

    struct Fixture {
        device: Arc<Device>,
        timers: TimerQueue<TimerTask>,
        voices: VoiceLedger,
        notes: NoteDispatcher,
    }

    impl Fixture {
        fn new() -> Fixture {
            let device = Arc::new(Device::get("mock-output"));
            Fixture {
                device: device.clone(),
                timers: TimerQueue::new(),
                voices: VoiceLedger::new(Some(device)),
                notes: NoteDispatcher::new(),
            }
        }

        /// Runs every task due at or before the given time.
        fn run_until(&mut self, now: u64) {
            while let Some(task) = self.timers.pop_due(now) {
                match task {
                    TimerTask::NoteOn(key) => self.notes.fire_on(&mut self.voices, &key, now),
                    TimerTask::NoteOff(key) => {
                        self.notes.fire_off(&mut self.voices, &key, now);
                    }
                    _ => panic!("unexpected task"),
                }
            }
        }
    }

    fn note(pitch: u8, duration: Option<DurationValue>) -> NoteItem {
        NoteItem {
            pitch,
            velocity: 0.8,
            channel: 1,
            pre_delay_ms: 0,
            duration,
        }
    }

    fn ms(value: f32) -> Option<DurationValue> {
        Some(DurationValue {
            value,
            unit: DurationUnit::Ms,
        })
    }

    #[test]
    fn test_timed_note_plays_and_ends() {
        let mut f = Fixture::new();
        let instance = InstanceId::new("m1", "a");

        let mut played = note(60, ms(100.0));
        played.pre_delay_ms = 50;
        f.notes.start(
            &mut f.timers,
            &mut f.voices,
            "p1",
            &instance,
            &played,
            120.0,
            None,
            0,
        );

        f.run_until(40);
        assert!(f.device.sent().is_empty());
        assert!(f.notes.active_notes().is_empty());

        f.run_until(50);
        assert_eq!(1, f.notes.active_notes().len());
        assert_eq!(0, f.notes.sustained_count("p1"));

        f.run_until(150);
        assert!(f.notes.active_notes().is_empty());
        assert!(f.voices.is_empty());
        assert_eq!(
            vec![
                Message::NoteOn {
                    channel: 1,
                    pitch: 60,
                    velocity: 102,
                },
                Message::NoteOff {
                    channel: 1,
                    pitch: 60,
                },
            ],
            f.device.sent()
        );
    }

    #[test]
    fn test_latched_note_holds_until_stopped() {
        let mut f = Fixture::new();
        let instance = InstanceId::new("m1", "a");

        f.notes.start(
            &mut f.timers,
            &mut f.voices,
            "p1",
            &instance,
            &note(60, None),
            120.0,
            None,
            0,
        );
        f.run_until(1_000);

        assert_eq!(1, f.notes.sustained_count("p1"));
        assert_eq!(1, f.notes.active_notes().len());

        f.notes
            .stop(&mut f.timers, &mut f.voices, "p1", &instance, 1, 60, 1_000);
        assert_eq!(0, f.notes.sustained_count("p1"));
        assert!(f.voices.is_empty());
    }

    #[test]
    fn test_override_duration_applies() {
        let mut f = Fixture::new();
        let instance = InstanceId::new("m1", "a");

        // A latched note with a one-beat override at 120 BPM ends at 500ms.
        f.notes.start(
            &mut f.timers,
            &mut f.voices,
            "p1",
            &instance,
            &note(60, None),
            120.0,
            Some(DurationValue {
                value: 1.0,
                unit: DurationUnit::Beat,
            }),
            0,
        );
        f.run_until(499);
        assert_eq!(1, f.notes.active_notes().len());
        f.run_until(500);
        assert!(f.notes.active_notes().is_empty());
        assert_eq!(0, f.notes.sustained_count("p1"));
    }

    #[test]
    fn test_takeover_between_instances() {
        let mut f = Fixture::new();
        let first = InstanceId::new("ma", "a");
        let second = InstanceId::new("mb", "b");

        f.notes.start(
            &mut f.timers,
            &mut f.voices,
            "p1",
            &first,
            &note(60, None),
            120.0,
            None,
            0,
        );
        f.run_until(0);

        // The second instance takes the voice over; exactly one note stays
        // active and the wire sees off + on.
        f.notes.start(
            &mut f.timers,
            &mut f.voices,
            "p1",
            &second,
            &note(60, None),
            120.0,
            None,
            10,
        );
        f.run_until(10);
        assert_eq!(1, f.notes.active_notes().len());
        assert_eq!(1, f.voices.held(1, 60));

        // The first instance's stop is a no-op now.
        f.notes
            .stop(&mut f.timers, &mut f.voices, "p1", &first, 1, 60, 20);
        assert_eq!(1, f.notes.active_notes().len());

        f.notes
            .stop(&mut f.timers, &mut f.voices, "p1", &second, 1, 60, 30);
        assert!(f.notes.active_notes().is_empty());
        assert!(f.voices.is_empty());
        assert_eq!(
            vec![
                Message::NoteOn {
                    channel: 1,
                    pitch: 60,
                    velocity: 102,
                },
                Message::NoteOff {
                    channel: 1,
                    pitch: 60,
                },
                Message::NoteOn {
                    channel: 1,
                    pitch: 60,
                    velocity: 102,
                },
                Message::NoteOff {
                    channel: 1,
                    pitch: 60,
                },
            ],
            f.device.sent()
        );
    }

    #[test]
    fn test_stop_before_pre_delay_cancels_silently() {
        let mut f = Fixture::new();
        let instance = InstanceId::new("m1", "a");

        let mut delayed = note(60, None);
        delayed.pre_delay_ms = 100;
        f.notes.start(
            &mut f.timers,
            &mut f.voices,
            "p1",
            &instance,
            &delayed,
            120.0,
            None,
            0,
        );
        f.notes
            .stop(&mut f.timers, &mut f.voices, "p1", &instance, 1, 60, 50);

        f.run_until(200);
        assert!(f.device.sent().is_empty());
        assert!(f.voices.is_empty());
    }

    #[test]
    fn test_stop_source_spares_timed_notes() {
        let mut f = Fixture::new();
        let instance = InstanceId::new("m1", "a");

        // One latched note, one timed note, one not yet sounding.
        f.notes.start(
            &mut f.timers,
            &mut f.voices,
            "s1",
            &instance,
            &note(60, None),
            120.0,
            None,
            0,
        );
        f.notes.start(
            &mut f.timers,
            &mut f.voices,
            "s1",
            &instance,
            &note(62, ms(500.0)),
            120.0,
            None,
            0,
        );
        let mut pending = note(64, None);
        pending.pre_delay_ms = 300;
        f.notes.start(
            &mut f.timers,
            &mut f.voices,
            "s1",
            &instance,
            &pending,
            120.0,
            None,
            0,
        );
        f.run_until(100);

        f.notes
            .stop_source(&mut f.timers, &mut f.voices, "s1", 100);

        // The latched note is gone, the pending note never sounds, the
        // timed note keeps playing until its off.
        assert_eq!(0, f.notes.sustained_count("s1"));
        let active = f.notes.active_notes();
        assert_eq!(1, active.len());
        assert_eq!(62, active[0].pitch);

        f.run_until(600);
        assert!(f.notes.active_notes().is_empty());
        assert!(f.voices.is_empty());
    }
}
