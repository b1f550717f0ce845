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
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::project;

mod error;
mod mapping;
mod preset;
mod sequence;
mod song;

pub use error::ConfigError;

/// A JSON representation of a project, as the editor persists it.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Project {
    name: String,
    #[serde(default)]
    songs: Vec<song::Song>,
    #[serde(default)]
    selected_input_id: Option<String>,
    #[serde(default)]
    selected_output_id: Option<String>,
    #[serde(default)]
    global_mappings: Vec<mapping::Global>,
}

impl Project {
    /// Converts the config project into a proper project object.
    fn to_project(&self) -> Result<project::Project, ConfigError> {
        Ok(project::Project {
            name: self.name.clone(),
            songs: self
                .songs
                .iter()
                .map(|song| song.to_song().map(Arc::new))
                .collect::<Result<Vec<Arc<project::Song>>, ConfigError>>()?,
            global_mappings: self
                .global_mappings
                .iter()
                .map(|mapping| mapping.to_mapping())
                .collect::<Result<Vec<project::GlobalMapping>, ConfigError>>()?,
            selected_input: self.selected_input_id.clone(),
            selected_output: self.selected_output_id.clone(),
        })
    }
}

/// Parses a project from a JSON string.
pub fn parse_project(raw: &str) -> Result<project::Project, ConfigError> {
    let parsed: Project = serde_json::from_str(raw)?;
    parsed.to_project()
}

/// Loads a project from a JSON file.
pub fn load_project(path: &Path) -> Result<project::Project, ConfigError> {
    parse_project(&fs::read_to_string(path)?)
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use crate::project::{
        DurationUnit, GlobalAction, KeyFilter, MappingAction, MappingScope, SequenceItemKind,
        SequenceMode,
    };

    use super::*;

    const PROJECT_JSON: &str = r#"{
        "name": "Rehearsal Set",
        "selectedInputId": "nanoKEY",
        "selectedOutputId": "UM-ONE",
        "globalMappings": [
            {"id": "g1", "keyboardValue": "n", "action": "nextSong"},
            {"id": "g2", "midiValue": "100,101", "midiChannel": 16, "action": "gotoSong", "actionValue": 2}
        ],
        "songs": [
            {
                "id": "song-1",
                "name": "Opener",
                "bpm": 96,
                "presetFolders": [{"id": "f1", "name": "Chords"}],
                "presets": [
                    {
                        "id": "p1",
                        "name": "Cmaj",
                        "notes": [
                            {"pitch": 60, "velocity": 0.8, "channel": 1},
                            {"pitch": 64, "velocity": 0.7, "channel": 1, "preDelayMs": 20,
                             "duration": {"value": 2, "unit": "beat"}}
                        ],
                        "glissando": {
                            "attackOn": true, "lowestPitch": 48, "targetPitch": 60,
                            "stepMs": 25, "mode": "white", "velocityLo": 0.3, "velocityHi": 0.9
                        }
                    }
                ],
                "sequences": [
                    {
                        "id": "s1",
                        "name": "Verse",
                        "mode": "step",
                        "gridSnap": 0.25,
                        "items": [
                            {"id": "i1", "type": "preset", "targetId": "p1", "sustainUntilNext": true},
                            {"id": "i2", "type": "note", "beatPosition": 1.5,
                             "noteData": {"pitch": 62, "velocity": 0.6, "channel": 2},
                             "overrideDuration": 1, "overrideUnit": "beat"}
                        ]
                    }
                ],
                "mappings": [
                    {"id": "m1", "keyboardValue": "a", "action": "preset", "targetId": "p1", "scope": "scene"},
                    {"id": "m2", "midiValue": "", "isMidiRange": true, "midiRangeStart": 60,
                     "midiRangeEnd": 72, "midiChannel": 2, "action": "sequence", "targetId": "s1"},
                    {"id": "m3", "keyboardValue": "2", "action": "switchScene", "targetId": "sc2"}
                ],
                "scenes": [
                    {"id": "sc1", "name": "Intro", "mappingIds": ["m1"]},
                    {"id": "sc2", "name": "Chorus", "mappingIds": []}
                ],
                "activeSceneId": "sc1"
            }
        ]
    }"#;

    #[test]
    fn test_parse_project() -> Result<(), ConfigError> {
        let parsed = parse_project(PROJECT_JSON)?;

        assert_eq!("Rehearsal Set", parsed.name);
        assert_eq!(Some("nanoKEY".to_string()), parsed.selected_input);
        assert_eq!(Some("UM-ONE".to_string()), parsed.selected_output);

        assert_eq!(2, parsed.global_mappings.len());
        assert_eq!(GlobalAction::NextSong, parsed.global_mappings[0].action);
        assert_eq!(GlobalAction::GotoSong(2), parsed.global_mappings[1].action);
        assert_eq!(16, parsed.global_mappings[1].midi_channel);

        let song = &parsed.songs[0];
        assert_eq!("Opener", song.name);
        assert_eq!(96.0, song.bpm);
        assert_eq!(Some("sc1".to_string()), song.active_scene_id);

        let preset = song.presets.get("p1").expect("expected preset");
        assert_eq!(2, preset.notes.len());
        assert_eq!(60, preset.notes[0].pitch);
        assert!(preset.notes[0].duration.is_none());
        assert_eq!(20, preset.notes[1].pre_delay_ms);
        let duration = preset.notes[1].duration.expect("expected duration");
        assert_eq!(2.0, duration.value);
        assert_eq!(DurationUnit::Beat, duration.unit);
        let glissando = preset.glissando.as_ref().expect("expected glissando");
        assert!(glissando.attack_on);
        assert!(!glissando.release_on);
        assert_eq!(KeyFilter::White, glissando.mode);
        assert_eq!(1, glissando.channel);

        let sequence = song.sequences.get("s1").expect("expected sequence");
        assert_eq!(SequenceMode::Step, sequence.mode);
        assert_eq!(2, sequence.items.len());
        assert!(sequence.items[0].sustain_until_next);
        assert!(matches!(
            &sequence.items[0].kind,
            SequenceItemKind::PresetRef(target) if target == "p1"
        ));
        assert!(matches!(
            &sequence.items[1].kind,
            SequenceItemKind::InlineNote(note) if note.pitch == 62 && note.channel == 2
        ));
        assert_eq!(1.5, sequence.items[1].beat_position);
        let override_duration = sequence.items[1]
            .override_duration
            .expect("expected override");
        assert_eq!(DurationUnit::Beat, override_duration.unit);

        assert_eq!(3, song.mappings.len());
        assert_eq!(MappingScope::Scene, song.mappings[0].scope);
        assert_eq!(MappingScope::Global, song.mappings[1].scope);
        assert!(song.mappings[1].is_midi_range);
        assert_eq!(MappingAction::SwitchScene, song.mappings[2].action);
        assert!(song.mappings.iter().all(|mapping| mapping.enabled));

        assert_eq!(2, song.scenes.len());
        assert!(song.scenes.get("sc1").unwrap().mapping_ids.contains("m1"));

        assert!(parsed.integrity_warnings().is_empty());
        Ok(())
    }

    #[test]
    fn test_load_project_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(PROJECT_JSON.as_bytes())?;

        let parsed = load_project(file.path())?;
        assert_eq!("Rehearsal Set", parsed.name);
        assert_eq!(1, parsed.songs.len());
        Ok(())
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        assert!(matches!(
            parse_project("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        assert!(matches!(
            load_project(Path::new("/definitely/not/here.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let out_of_range_channel = r#"{
            "name": "Bad",
            "songs": [{
                "id": "s", "name": "S",
                "presets": [{"id": "p", "name": "P",
                    "notes": [{"pitch": 60, "velocity": 0.5, "channel": 17}]}]
            }]
        }"#;
        assert!(matches!(
            parse_project(out_of_range_channel),
            Err(ConfigError::Invalid(_))
        ));

        let goto_without_value = r#"{
            "name": "Bad",
            "globalMappings": [{"id": "g", "action": "gotoSong"}]
        }"#;
        assert!(matches!(
            parse_project(goto_without_value),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_integrity_warnings_surface_dangling_ids() -> Result<(), ConfigError> {
        let dangling = r#"{
            "name": "Dangling",
            "songs": [{
                "id": "s", "name": "S",
                "mappings": [{"id": "m", "keyboardValue": "a",
                              "action": "preset", "targetId": "nope"}]
            }]
        }"#;
        let parsed = parse_project(dangling)?;
        let warnings = parsed.integrity_warnings();
        assert_eq!(1, warnings.len());
        assert!(warnings[0].contains("nope"));
        Ok(())
    }
}
