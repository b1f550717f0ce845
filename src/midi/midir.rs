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
use std::{
    collections::HashMap,
    error::Error,
    fmt, mem,
    sync::Mutex,
};

use midir::{
    MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection,
    MidiOutputPort,
};
use midly::live::LiveEvent;
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, info, span, warn, Level};

use super::{wire_channel, wire_u7, wire_velocity};

pub struct Device {
    name: String,
    input_port: Option<MidiInputPort>,
    output_port: Option<MidiOutputPort>,
    event_connection: Mutex<Option<MidiInputConnection<()>>>,
    output_connection: Mutex<Option<MidiOutputConnection>>,
}

impl Device {
    /// Sends a single live event through the output connection, opening the
    /// connection on first use.
    fn send(&self, event: LiveEvent) -> Result<(), Box<dyn Error>> {
        let mut connection = self
            .output_connection
            .lock()
            .expect("unable to get output lock");

        if connection.is_none() {
            let output_port = match self.output_port.as_ref() {
                Some(output_port) => output_port,
                None => {
                    debug!(
                        device = self.name,
                        "No MIDI output port configured, dropping event."
                    );
                    return Ok(());
                }
            };
            let output = MidiOutput::new("mstage output")?;
            *connection = Some(output.connect(output_port, "mstage engine")?);
        }

        let mut buf: Vec<u8> = Vec::with_capacity(8);
        event.write(&mut buf)?;
        connection
            .as_mut()
            .expect("connection just opened")
            .send(&buf)?;

        Ok(())
    }
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), Box<dyn Error>> {
        let span = span!(Level::INFO, "wait for event (midir)");
        let _enter = span.enter();

        let mut event_connection = self.event_connection.lock().expect("unable to get lock");
        if event_connection.is_some() {
            return Err("Already watching events.".into());
        }

        info!("Watching MIDI events.");

        let input_port = match self.input_port.as_ref() {
            Some(input_port) => input_port,
            None => {
                warn!("No MIDI input port configured, cannot listen for events.");
                return Ok(());
            }
        };

        let input = MidiInput::new("mstage input")?;
        *event_connection = Some(input.connect(
            input_port,
            "mstage input watcher",
            move |_, raw_event, _| {
                if let Ok(event) = LiveEvent::parse(raw_event) {
                    debug!(event = format!("{:?}", event), "Received MIDI event.");
                }
                if let Err(e) = sender.blocking_send(Vec::from(raw_event)) {
                    error!(
                        err = format!("{:?}", e),
                        "Error sending MIDI event to receiver."
                    );
                }
            },
            (),
        )?);

        Ok(())
    }

    /// Stops watching events.
    fn stop_watch_events(&self) {
        // Explicitly drop the connection.
        let event_connection = self
            .event_connection
            .lock()
            .expect("error getting mutex")
            .take();

        mem::drop(event_connection);
    }

    fn send_note_on(&self, channel: u8, pitch: u8, velocity: f32) -> Result<(), Box<dyn Error>> {
        self.send(LiveEvent::Midi {
            channel: wire_channel(channel),
            message: midly::MidiMessage::NoteOn {
                key: wire_u7(pitch),
                vel: wire_velocity(velocity),
            },
        })
    }

    fn send_note_off(&self, channel: u8, pitch: u8) -> Result<(), Box<dyn Error>> {
        self.send(LiveEvent::Midi {
            channel: wire_channel(channel),
            message: midly::MidiMessage::NoteOff {
                key: wire_u7(pitch),
                vel: 0.into(),
            },
        })
    }

    fn send_control_change(
        &self,
        channel: u8,
        controller: u8,
        value: u8,
    ) -> Result<(), Box<dyn Error>> {
        self.send(LiveEvent::Midi {
            channel: wire_channel(channel),
            message: midly::MidiMessage::Controller {
                controller: wire_u7(controller),
                value: wire_u7(value),
            },
        })
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut capabilities: Vec<String> = Vec::new();
        if self.input_port.is_some() {
            capabilities.push(String::from("Input"));
        }
        if self.output_port.is_some() {
            capabilities.push(String::from("Output"));
        }

        write!(f, "{} ({})", self.name, capabilities.join("/"))
    }
}

/// Lists midir devices and produces the Device trait.
pub fn list() -> Result<Vec<Box<dyn super::Device>>, Box<dyn Error>> {
    Ok(list_midir_devices()?
        .into_iter()
        .map(|device| {
            let device: Box<dyn super::Device> = Box::new(device);
            device
        })
        .collect())
}

/// Lists midir devices.
fn list_midir_devices() -> Result<Vec<Device>, Box<dyn Error>> {
    let input = MidiInput::new("mstage input listing")?;
    let output = MidiOutput::new("mstage output listing")?;
    let input_ports = input.ports();
    let output_ports = output.ports();

    let mut devices: HashMap<String, Device> = HashMap::new();

    for port in input_ports {
        let name = input.port_name(&port)?;
        if !devices.contains_key(&name) {
            devices.insert(
                name.clone(),
                Device {
                    name: name.clone(),
                    input_port: Some(port),
                    output_port: None,
                    event_connection: Mutex::new(None),
                    output_connection: Mutex::new(None),
                },
            );
        }
    }

    for port in output_ports {
        let name = output.port_name(&port)?;
        match devices.get_mut(&name) {
            Some(device) => {
                device.output_port = Some(port);
            }
            None => {
                devices.insert(
                    name.clone(),
                    Device {
                        name: name.clone(),
                        input_port: None,
                        output_port: Some(port),
                        event_connection: Mutex::new(None),
                        output_connection: Mutex::new(None),
                    },
                );
            }
        }
    }

    let mut sorted_devices = devices
        .into_iter()
        .map(|entry| entry.1)
        .collect::<Vec<Device>>();
    sorted_devices.sort_by_key(|device| device.name.clone());
    Ok(sorted_devices)
}

/// Gets the given midir device.
pub fn get(name: &str) -> Result<Device, Box<dyn Error>> {
    let mut matches = list_midir_devices()?
        .into_iter()
        .filter(|device| device.name.contains(name))
        .collect::<Vec<Device>>();

    if matches.is_empty() {
        return Err(format!("no device found with name {}", name).into());
    }
    if matches.len() > 1 {
        return Err(format!(
            "found too many devices that match ({}), use a less ambiguous device name",
            matches
                .iter()
                .map(|device| device.name.clone())
                .collect::<Vec<String>>()
                .join(", ")
        )
        .into());
    }

    // We've verified that there's only one element in the vector, so this should be safe.
    Ok(matches.swap_remove(0))
}
