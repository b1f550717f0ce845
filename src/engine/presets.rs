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
use std::sync::Arc;

use tracing::debug;

use crate::notes::{InstanceId, TimerTask};
use crate::project::{DurationValue, GlissandoConfig, Preset};

use super::EngineState;

/// Which way a glissando walk runs.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkDirection {
    Attack,
    Release,
}

impl EngineState {
    /// Opens a preset under the given instance. The instance becomes the
    /// owner of the source; whoever opened it before loses the right to
    /// close it.
    pub(crate) fn open_preset(
        &mut self,
        preset: &Arc<Preset>,
        instance: &InstanceId,
        bpm: f32,
        override_duration: Option<DurationValue>,
        source_id: &str,
        now: u64,
    ) {
        self.owners.insert(source_id.to_string(), instance.clone());

        let mut start_at = now;
        if let Some(glissando) = preset.glissando.as_ref() {
            if glissando.attack_on {
                // The chord lands when the walk resolves.
                start_at += self.schedule_glissando(glissando, WalkDirection::Attack, now);
            }
        }

        for note in preset.notes.iter() {
            if self.notes.start(
                &mut self.timers,
                &mut self.voices,
                source_id,
                instance,
                note,
                bpm,
                override_duration,
                start_at,
            ) {
                self.panic_pending = true;
            }
        }
    }

    /// Closes a preset. Only the owning instance may close; in sustained
    /// mode the notes outlive the release and the next step advance ends
    /// them instead.
    pub(crate) fn close_preset(
        &mut self,
        preset: &Arc<Preset>,
        instance: &InstanceId,
        sustained_mode: bool,
        source_id: &str,
        now: u64,
    ) {
        if self.owners.get(source_id) != Some(instance) {
            debug!(
                preset = preset.name,
                "Close from a non-owning instance, ignoring."
            );
            return;
        }
        if sustained_mode {
            return;
        }

        for note in preset.notes.iter() {
            if self.notes.stop(
                &mut self.timers,
                &mut self.voices,
                source_id,
                instance,
                note.channel,
                note.pitch,
                now,
            ) {
                self.panic_pending = true;
            }
        }

        if let Some(glissando) = preset.glissando.as_ref() {
            if glissando.release_on {
                self.schedule_glissando(glissando, WalkDirection::Release, now);
            }
        }
    }

    /// Schedules the walk's steps and returns its total duration in
    /// milliseconds. Steps go through the voice ledger but are never
    /// recorded as sustained; each one carries its own fixed hold.
    fn schedule_glissando(
        &mut self,
        config: &GlissandoConfig,
        direction: WalkDirection,
        now: u64,
    ) -> u64 {
        let pitches = walk_pitches(config, direction);
        if pitches.is_empty() {
            return 0;
        }
        let step_ms = config.step_ms.max(1);
        let count = pitches.len();
        for (index, pitch) in pitches.into_iter().enumerate() {
            let velocity = walk_velocity(config, direction, index, count);
            self.timers.schedule(
                now + index as u64 * step_ms,
                TimerTask::GlissandoStep {
                    channel: config.channel,
                    pitch,
                    velocity,
                    hold_ms: step_ms,
                },
            );
        }
        count as u64 * step_ms
    }
}

/// The pitches of a walk: every pitch between the endpoints (inclusive,
/// in walk order) that the key filter admits.
pub(crate) fn walk_pitches(config: &GlissandoConfig, direction: WalkDirection) -> Vec<u8> {
    let (start, end) = match direction {
        WalkDirection::Attack => (config.lowest_pitch, config.target_pitch),
        WalkDirection::Release => (config.target_pitch, config.lowest_pitch),
    };

    let mut pitches = Vec::new();
    let mut current = start.min(127) as i16;
    let end = end.min(127) as i16;
    let step: i16 = if current <= end { 1 } else { -1 };
    loop {
        if config.mode.admits(current as u8) {
            pitches.push(current as u8);
        }
        if current == end {
            break;
        }
        current += step;
    }
    pitches
}

/// Interpolated velocity for a walk step: lo to hi on attack, hi to lo on
/// release.
fn walk_velocity(
    config: &GlissandoConfig,
    direction: WalkDirection,
    index: usize,
    count: usize,
) -> f32 {
    let t = if count <= 1 {
        1.0
    } else {
        index as f32 / (count - 1) as f32
    };
    let (from, to) = match direction {
        WalkDirection::Attack => (config.velocity_lo, config.velocity_hi),
        WalkDirection::Release => (config.velocity_hi, config.velocity_lo),
    };
    from + (to - from) * t
}
