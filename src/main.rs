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
use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use mstage::{config, controller, engine::Engine, midi};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = "0.3.0",
    about = "A MIDI routing and sequencing engine for live performances."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available MIDI input/output devices.
    MidiDevices {},
    /// Loads and verifies a project file.
    Check {
        /// The path to the project file.
        project_path: String,
    },
    /// Start will start the engine with the given project.
    Start {
        /// The path to the project file.
        project_path: String,
        /// The MIDI output device name. Defaults to the project's selected
        /// output.
        #[arg[short, long]]
        output_device_name: Option<String>,
        /// The MIDI input device name. Defaults to the project's selected
        /// input.
        #[arg[short, long]]
        input_device_name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Check { project_path } => {
            let project = config::load_project(&PathBuf::from(&project_path))?;

            println!("Project: {} (songs: {})", project.name, project.songs.len());
            for song in project.songs.iter() {
                println!("- {}", song);
            }

            let warnings = project.integrity_warnings();
            if warnings.is_empty() {
                println!("No problems found.");
            } else {
                println!("\nProblems (count: {}):", warnings.len());
                for warning in warnings.iter() {
                    println!("- {}", warning);
                }
                return Err(format!("{} problems found in {}", warnings.len(), project_path).into());
            }
        }
        Commands::Start {
            project_path,
            output_device_name,
            input_device_name,
        } => {
            let project = config::load_project(&PathBuf::from(&project_path))?;

            let output_name = output_device_name.or_else(|| project.selected_output.clone());
            let output = match output_name {
                Some(name) => Some(midi::get_device(&name)?),
                None => None,
            };
            let input_name = input_device_name.or_else(|| project.selected_input.clone());
            let input = match input_name {
                Some(name) => Some(midi::get_device(&name)?),
                None => None,
            };

            let engine = Arc::new(Engine::new(project, output));
            let mut drivers: Vec<Arc<dyn controller::Driver>> =
                vec![Arc::new(controller::keyboard::Driver::new())];
            if let Some(input) = input {
                drivers.push(Arc::new(controller::midi::Driver::new(input)));
            }

            controller::Controller::new(engine, drivers)?.join().await?;
        }
    }

    Ok(())
}
