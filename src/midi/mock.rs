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
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Barrier, Mutex,
    },
};

use tokio::{sync::mpsc::Sender, task::JoinHandle};

use super::wire_velocity;

/// A message the mock device observed, in wire units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
}

/// A mock device. Records outgoing messages instead of playing them and can
/// feed fabricated input events to watchers.
pub struct Device {
    name: String,
    sent: Mutex<Vec<Message>>,
    barrier: Arc<Barrier>,
    closed: Arc<AtomicBool>,
    event: Arc<Mutex<Vec<u8>>>,
    event_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            sent: Mutex::new(Vec::new()),
            barrier: Arc::new(Barrier::new(2)),
            closed: Arc::new(AtomicBool::new(false)),
            event: Arc::new(Mutex::new(Vec::new())),
            event_thread: Mutex::new(None),
        }
    }

    #[cfg(test)]
    /// Sends the mock event through to the watcher.
    pub fn mock_event(&self, event: &[u8]) {
        {
            let mut mutex_event = self.event.lock().expect("Unable to get event lock.");
            *mutex_event = event.to_vec();
        }
        // Wait until the thread goes to receive the event.
        self.barrier.wait();
        // Wait until the thread has locked the mutex.
        self.barrier.wait();
    }

    #[cfg(test)]
    /// The messages sent through the device so far.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().expect("Unable to get sent lock.").clone()
    }

    #[cfg(test)]
    /// Forgets all recorded messages.
    pub fn clear_sent(&self) {
        self.sent.lock().expect("Unable to get sent lock.").clear();
    }

    fn record(&self, message: Message) {
        self.sent
            .lock()
            .expect("Unable to get sent lock.")
            .push(message);
    }
}

impl super::Device for Device {
    /// Returns the name of the device.
    fn name(&self) -> String {
        self.name.clone()
    }

    /// Watches MIDI input for events and sends them to the given sender.
    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), Box<dyn Error>> {
        let mut event_thread = self.event_thread.lock().expect("Unable to get lock");
        if event_thread.is_some() {
            return Err("Already watching events.".into());
        }

        let barrier = self.barrier.clone();
        let event = self.event.clone();
        let closed = self.closed.clone();
        *event_thread = Some(tokio::task::spawn_blocking(move || loop {
            barrier.wait();

            {
                if closed.load(Ordering::Relaxed) {
                    return;
                }
                let event = event.lock().expect("Unable to get event lock.");
                sender
                    .blocking_send(event.to_vec())
                    .expect("Error sending event.");
            }
            barrier.wait();
        }));

        Ok(())
    }

    /// Stops watching events.
    fn stop_watch_events(&self) {
        if self
            .event_thread
            .lock()
            .expect("Unable to get lock")
            .is_none()
        {
            return;
        }
        self.closed.store(true, Ordering::Relaxed);
        // Wait for watcher thread to move to next loop iteration.
        self.barrier.wait();
    }

    fn send_note_on(&self, channel: u8, pitch: u8, velocity: f32) -> Result<(), Box<dyn Error>> {
        self.record(Message::NoteOn {
            channel,
            pitch,
            velocity: wire_velocity(velocity).as_int(),
        });
        Ok(())
    }

    fn send_note_off(&self, channel: u8, pitch: u8) -> Result<(), Box<dyn Error>> {
        self.record(Message::NoteOff { channel, pitch });
        Ok(())
    }

    fn send_control_change(
        &self,
        channel: u8,
        controller: u8,
        value: u8,
    ) -> Result<(), Box<dyn Error>> {
        self.record(Message::ControlChange {
            channel,
            controller,
            value,
        });
        Ok(())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name,)
    }
}
