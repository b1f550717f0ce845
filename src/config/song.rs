// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
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

use serde::Deserialize;

use crate::project;

use super::error::ConfigError;
use super::{mapping, preset, sequence};

/// A JSON representation of a song.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Song {
    id: String,
    name: String,
    #[serde(default)]
    bpm: f32,
    #[serde(default)]
    presets: Vec<preset::Preset>,
    /// Editor-only: how the editor groups presets in its browser.
    #[serde(default, rename = "presetFolders")]
    _preset_folders: Vec<serde_json::Value>,
    #[serde(default)]
    sequences: Vec<sequence::Sequence>,
    #[serde(default)]
    mappings: Vec<mapping::Mapping>,
    #[serde(default)]
    scenes: Vec<Scene>,
    #[serde(default)]
    active_scene_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Scene {
    id: String,
    name: String,
    #[serde(default)]
    mapping_ids: Vec<String>,
}

impl Song {
    /// Converts the config song into a proper song object.
    pub(super) fn to_song(&self) -> Result<project::Song, ConfigError> {
        let presets = self
            .presets
            .iter()
            .map(|preset| preset.to_preset().map(|p| (p.id.clone(), Arc::new(p))))
            .collect::<Result<HashMap<String, Arc<project::Preset>>, ConfigError>>()?;
        let sequences = self
            .sequences
            .iter()
            .map(|sequence| sequence.to_sequence().map(|s| (s.id.clone(), Arc::new(s))))
            .collect::<Result<HashMap<String, Arc<project::Sequence>>, ConfigError>>()?;
        let mappings = self
            .mappings
            .iter()
            .map(|mapping| mapping.to_mapping().map(Arc::new))
            .collect::<Result<Vec<Arc<project::InputMapping>>, ConfigError>>()?;
        let scenes = self
            .scenes
            .iter()
            .map(|scene| {
                (
                    scene.id.clone(),
                    Arc::new(project::Scene {
                        id: scene.id.clone(),
                        name: scene.name.clone(),
                        mapping_ids: scene.mapping_ids.iter().cloned().collect::<HashSet<_>>(),
                    }),
                )
            })
            .collect();

        Ok(project::Song {
            id: self.id.clone(),
            name: self.name.clone(),
            bpm: self.bpm,
            presets,
            sequences,
            mappings,
            scenes,
            active_scene_id: self.active_scene_id.clone(),
        })
    }
}
