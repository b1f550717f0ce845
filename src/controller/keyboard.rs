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
use std::io;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::info;

use crate::engine::{TriggerEdge, TriggerEvent};

use super::Event;

/// A controller that triggers the engine from stdin. `+a` presses the
/// trigger "a", `-a` releases it, a bare value presses and releases in one
/// go, and `panic` / `reset` reach the engine's recovery entry points.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            info!("Keyboard driver started.");

            loop {
                let mut input: String = String::default();
                if io::stdin().read_line(&mut input)? == 0 {
                    info!("Keyboard input closed.");
                    return Ok(());
                }

                for event in parse_line(&input) {
                    events_tx
                        .blocking_send(event)
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                }
            }
        })
    }
}

/// Parses one stdin line into controller events.
fn parse_line(line: &str) -> Vec<Event> {
    let line = line.trim();
    match line {
        "" => Vec::new(),
        "panic" => vec![Event::Panic],
        "reset" => vec![Event::ResetSequences],
        _ => {
            if let Some(value) = line.strip_prefix('+') {
                vec![Event::Trigger(TriggerEvent::keyboard(
                    value,
                    TriggerEdge::Press,
                ))]
            } else if let Some(value) = line.strip_prefix('-') {
                vec![Event::Trigger(TriggerEvent::keyboard(
                    value,
                    TriggerEdge::Release,
                ))]
            } else {
                vec![
                    Event::Trigger(TriggerEvent::keyboard(line, TriggerEdge::Press)),
                    Event::Trigger(TriggerEvent::keyboard(line, TriggerEdge::Release)),
                ]
            }
        }
    }
}
