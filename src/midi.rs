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
use std::{error::Error, fmt, sync::Arc};

use midly::num::{u4, u7};
use tokio::sync::mpsc::Sender;

mod midir;
pub mod mock;

/// A MIDI device the engine can send notes through and listen for inputs on.
pub trait Device: fmt::Display + std::marker::Send + std::marker::Sync {
    /// Returns the name of the device.
    fn name(&self) -> String;

    /// Watches MIDI input for events and sends them to the given sender.
    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), Box<dyn Error>>;

    /// Stops watching events.
    fn stop_watch_events(&self);

    /// Sends a note-on. The channel is 1..=16, velocity is normalized
    /// 0.0..=1.0 and converted to the wire range by the device.
    fn send_note_on(&self, channel: u8, pitch: u8, velocity: f32) -> Result<(), Box<dyn Error>>;

    /// Sends a note-off.
    fn send_note_off(&self, channel: u8, pitch: u8) -> Result<(), Box<dyn Error>>;

    /// Sends a control change.
    fn send_control_change(
        &self,
        channel: u8,
        controller: u8,
        value: u8,
    ) -> Result<(), Box<dyn Error>>;
}

/// Lists devices known to midir.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    midir::list()
}

/// Gets a device with the given name.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    };

    Ok(Arc::new(midir::get(name)?))
}

/// Converts a 1..=16 channel to the wire representation.
pub(crate) fn wire_channel(channel: u8) -> u4 {
    u4::from(channel.clamp(1, 16) - 1)
}

/// Converts a normalized velocity to the wire range.
pub(crate) fn wire_velocity(velocity: f32) -> u7 {
    u7::from((velocity.clamp(0.0, 1.0) * 127.0).round() as u8)
}

/// Clamps a pitch or controller value to the wire range.
pub(crate) fn wire_u7(value: u8) -> u7 {
    u7::from(value.min(127))
}
