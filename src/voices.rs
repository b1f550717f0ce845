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

use tracing::{debug, warn};

use crate::midi;

/// All notes off.
const CC_ALL_NOTES_OFF: u8 = 123;

/// Releases without a prior acquire beyond this count within the window are
/// treated as a broken invariant and reported to the caller.
const UNBALANCE_LIMIT: usize = 8;
const UNBALANCE_WINDOW_MS: u64 = 1_000;

/// Reference-counted voice tracking per (channel, pitch). Arbitrary
/// overlapping open/close operations upstream become a well-formed stream of
/// note-on/note-off at the wire: the first acquire emits note-on, stacked
/// acquires retrigger, and only the last release emits note-off.
pub struct VoiceLedger {
    output: Option<Arc<dyn midi::Device>>,
    refcounts: HashMap<(u8, u8), u32>,
    unbalanced_releases: Vec<u64>,
}

impl VoiceLedger {
    pub fn new(output: Option<Arc<dyn midi::Device>>) -> VoiceLedger {
        VoiceLedger {
            output,
            refcounts: HashMap::new(),
            unbalanced_releases: Vec::new(),
        }
    }

    /// Takes a hold on the voice. The first holder gets a plain note-on;
    /// later holders observe their own attack velocity via a retrigger
    /// (note-off then note-on) while the off lifecycle stays safe.
    pub fn acquire(&mut self, channel: u8, pitch: u8, velocity: f32) {
        let count = self.refcounts.get(&(channel, pitch)).copied().unwrap_or(0);
        if count > 0 {
            self.send_note_off(channel, pitch);
        }
        self.refcounts.insert((channel, pitch), count + 1);
        self.send_note_on(channel, pitch, velocity);
    }

    /// Drops a hold on the voice, emitting note-off when the last holder
    /// lets go. A release without a prior acquire is ignored; returns true
    /// if such releases exceed the unbalance limit within the window, which
    /// callers should treat as fatal.
    pub fn release(&mut self, channel: u8, pitch: u8, now: u64) -> bool {
        match self.refcounts.get(&(channel, pitch)).copied() {
            Some(count) if count > 1 => {
                self.refcounts.insert((channel, pitch), count - 1);
                false
            }
            Some(_) => {
                self.refcounts.remove(&(channel, pitch));
                self.send_note_off(channel, pitch);
                false
            }
            None => {
                debug!(channel, pitch, "Release without acquire, ignoring.");
                self.unbalanced_releases
                    .retain(|at| now.saturating_sub(*at) < UNBALANCE_WINDOW_MS);
                self.unbalanced_releases.push(now);
                if self.unbalanced_releases.len() > UNBALANCE_LIMIT {
                    warn!("Voice ledger is unbalanced, requesting panic.");
                    self.unbalanced_releases.clear();
                    return true;
                }
                false
            }
        }
    }

    /// Broadcasts CC 123 (all notes off) on every channel and drops the
    /// table. Used only by panic.
    pub fn clear_all(&mut self) {
        for channel in 1..=16u8 {
            self.send_control_change(channel, CC_ALL_NOTES_OFF, 0);
        }
        self.refcounts.clear();
        self.unbalanced_releases.clear();
    }

    /// The number of holders of the given voice.
    pub fn held(&self, channel: u8, pitch: u8) -> u32 {
        self.refcounts.get(&(channel, pitch)).copied().unwrap_or(0)
    }

    /// True if no voice is held.
    pub fn is_empty(&self) -> bool {
        self.refcounts.is_empty()
    }

    fn send_note_on(&self, channel: u8, pitch: u8, velocity: f32) {
        if let Some(output) = &self.output {
            if let Err(e) = output.send_note_on(channel, pitch, velocity) {
                debug!(err = e.as_ref(), channel, pitch, "Error sending note-on.");
            }
        }
    }

    fn send_note_off(&self, channel: u8, pitch: u8) {
        if let Some(output) = &self.output {
            if let Err(e) = output.send_note_off(channel, pitch) {
                debug!(err = e.as_ref(), channel, pitch, "Error sending note-off.");
            }
        }
    }

    fn send_control_change(&self, channel: u8, controller: u8, value: u8) {
        if let Some(output) = &self.output {
            if let Err(e) = output.send_control_change(channel, controller, value) {
                debug!(err = e.as_ref(), channel, "Error sending control change.");
            }
        }
    }
}
