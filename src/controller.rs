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
use std::error::Error;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{debug, error, info};

use crate::engine::{Engine, TriggerEvent};

pub mod keyboard;
pub mod midi;

/// Controller events that will trigger behavior in the engine.
#[derive(Debug)]
pub enum Event {
    /// A trigger press or release to route.
    Trigger(TriggerEvent),

    /// Silences everything and drops runtime state.
    Panic,

    /// Rewinds all sequences and releases their sustained notes.
    ResetSequences,
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Feeds events from input drivers into the engine.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given drivers.
    pub fn new(
        engine: Arc<Engine>,
        drivers: Vec<Arc<dyn Driver>>,
    ) -> Result<Controller, Box<dyn Error>> {
        Ok(Controller {
            handle: tokio::spawn(
                async move { Controller::trigger_events(engine, drivers).await },
            ),
        })
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Triggers engine behavior by watching the drivers and getting events
    /// from them.
    async fn trigger_events(engine: Arc<Engine>, drivers: Vec<Arc<dyn Driver>>) {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let mut monitors = Vec::new();
        for driver in drivers.iter() {
            monitors.push(driver.monitor_events(events_tx.clone()));
        }
        // The receiver should close once every monitor is gone.
        drop(events_tx);

        info!("Controller started.");

        loop {
            if let Some(event) = events_rx.recv().await {
                debug!(event = format!("{:?}", event), "Received event.");

                match event {
                    Event::Trigger(trigger) => engine.submit(trigger).await,
                    Event::Panic => engine.panic().await,
                    Event::ResetSequences => engine.reset_sequences().await,
                }
            } else {
                info!("Controller closing.");
                for monitor in monitors {
                    if let Err(e) = monitor.await {
                        error!("Error waiting for event monitor to stop: {}", e);
                    }
                }
                return;
            }
        }
    }
}
