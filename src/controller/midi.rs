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
use std::{io, sync::Arc};

use midly::{live::LiveEvent, MidiMessage};
use tokio::{
    sync::mpsc::{self, Sender},
    task::JoinHandle,
};
use tracing::{error, info};

use crate::engine::{TriggerEdge, TriggerEvent};
use crate::midi;

use super::Event;

/// A controller that triggers the engine from a MIDI input device. Note-ons
/// become presses, note-offs (and zero-velocity note-ons) become releases;
/// everything else on the wire is ignored.
pub struct Driver {
    /// The device that the driver will monitor.
    device: Arc<dyn midi::Device>,
}

impl Driver {
    pub fn new(device: Arc<dyn midi::Device>) -> Driver {
        Driver { device }
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        let (midi_events_tx, mut midi_events_rx) = mpsc::channel::<Vec<u8>>(10);
        let device = self.device.clone();

        tokio::task::spawn_blocking(move || {
            info!("MIDI driver started.");

            device
                .watch_events(midi_events_tx)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

            loop {
                let raw_event = match midi_events_rx.blocking_recv() {
                    Some(raw_event) => raw_event,
                    None => {
                        info!("MIDI watcher closed.");
                        return Ok(());
                    }
                };

                let event = match LiveEvent::parse(&raw_event) {
                    Ok(event) => event,
                    Err(e) => {
                        error!(err = format!("{:?}", e), "Error parsing event.");
                        continue;
                    }
                };

                if let Some(trigger) = trigger_from_event(&event) {
                    events_tx
                        .blocking_send(Event::Trigger(trigger))
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                }
            }
        })
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.device.stop_watch_events();
    }
}

/// Converts an incoming live event to a trigger, if it is one.
fn trigger_from_event(event: &LiveEvent) -> Option<TriggerEvent> {
    match event {
        LiveEvent::Midi { channel, message } => {
            let channel = channel.as_int() + 1;
            match message {
                MidiMessage::NoteOn { key, vel } => {
                    let edge = if vel.as_int() == 0 {
                        // Running-status devices send velocity-zero note-ons
                        // instead of note-offs.
                        TriggerEdge::Release
                    } else {
                        TriggerEdge::Press
                    };
                    Some(TriggerEvent::midi(key.as_int(), channel, edge))
                }
                MidiMessage::NoteOff { key, .. } => {
                    Some(TriggerEvent::midi(key.as_int(), channel, TriggerEdge::Release))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use std::{collections::HashMap, error::Error, sync::Arc};

    use crate::controller::Controller;
    use crate::engine::{Engine, TriggerEdge, TriggerInput};
    use crate::midi::mock;
    use crate::project::{
        InputMapping, MappingAction, MappingScope, NoteItem, Preset, Project, Song,
    };
    use crate::test::eventually;

    use super::*;

    #[test]
    fn test_trigger_from_event() {
        let note_on = LiveEvent::Midi {
            channel: 1.into(),
            message: MidiMessage::NoteOn {
                key: 60.into(),
                vel: 100.into(),
            },
        };
        let trigger = trigger_from_event(&note_on).expect("expected trigger");
        assert_eq!(TriggerEdge::Press, trigger.edge);
        assert!(
            matches!(trigger.input, TriggerInput::Midi { pitch: 60, channel: 2 }),
            "wrong input: {:?}",
            trigger.input
        );

        let zero_velocity = LiveEvent::Midi {
            channel: 1.into(),
            message: MidiMessage::NoteOn {
                key: 60.into(),
                vel: 0.into(),
            },
        };
        let trigger = trigger_from_event(&zero_velocity).expect("expected trigger");
        assert_eq!(TriggerEdge::Release, trigger.edge);

        let note_off = LiveEvent::Midi {
            channel: 1.into(),
            message: MidiMessage::NoteOff {
                key: 60.into(),
                vel: 0.into(),
            },
        };
        let trigger = trigger_from_event(&note_off).expect("expected trigger");
        assert_eq!(TriggerEdge::Release, trigger.edge);

        let aftertouch = LiveEvent::Midi {
            channel: 1.into(),
            message: MidiMessage::ChannelAftertouch { vel: 10.into() },
        };
        assert!(trigger_from_event(&aftertouch).is_none());
    }

    fn test_project() -> Project {
        let preset = Preset {
            id: "p1".to_string(),
            name: "P1".to_string(),
            notes: vec![NoteItem {
                pitch: 72,
                velocity: 0.9,
                channel: 1,
                pre_delay_ms: 0,
                duration: None,
            }],
            glissando: None,
        };
        let mapping = InputMapping {
            id: "m1".to_string(),
            keyboard_value: String::new(),
            midi_value: "60".to_string(),
            midi_channel: 0,
            is_midi_range: false,
            midi_range_start: 0,
            midi_range_end: 0,
            action: MappingAction::Preset,
            target_id: "p1".to_string(),
            enabled: true,
            scope: MappingScope::Global,
        };
        Project {
            name: "Test".to_string(),
            songs: vec![Arc::new(Song {
                id: "song-1".to_string(),
                name: "Song 1".to_string(),
                bpm: 120.0,
                presets: HashMap::from([("p1".to_string(), Arc::new(preset))]),
                sequences: HashMap::new(),
                mappings: vec![Arc::new(mapping)],
                scenes: HashMap::new(),
                active_scene_id: None,
            })],
            global_mappings: Vec::new(),
            selected_input: None,
            selected_output: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_midi_controller() -> Result<(), Box<dyn Error>> {
        let input_device = Arc::new(mock::Device::get("mock-midi-input"));
        let output_device = Arc::new(mock::Device::get("mock-midi-output"));
        let engine = Arc::new(Engine::new(test_project(), Some(output_device.clone())));
        let driver = Arc::new(Driver::new(input_device.clone()));
        let _controller = Controller::new(engine.clone(), vec![driver])?;

        let press = LiveEvent::Midi {
            channel: 4.into(),
            message: MidiMessage::NoteOn {
                key: 60.into(),
                vel: 100.into(),
            },
        };
        let release = LiveEvent::Midi {
            channel: 4.into(),
            message: MidiMessage::NoteOff {
                key: 60.into(),
                vel: 0.into(),
            },
        };
        let mut press_buf: Vec<u8> = Vec::with_capacity(8);
        let mut release_buf: Vec<u8> = Vec::with_capacity(8);
        press.write(&mut press_buf)?;
        release.write(&mut release_buf)?;

        input_device.mock_event(&press_buf);
        eventually(
            || engine.observe_active_notes().len() == 1,
            "Note never started playing",
        );

        input_device.mock_event(&release_buf);
        eventually(
            || engine.observe_active_notes().is_empty(),
            "Note never stopped playing",
        );

        Ok(())
    }
}
