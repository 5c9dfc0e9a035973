mod analyser;
mod audio_graph;
mod audio_player;
mod command;
mod config;
mod equalizer;
mod error;
mod state;
mod track;
mod tui;
mod visualizer;

use crate::analyser::AnalyserWindow;
use crate::audio_player::AudioPlayer;
use crate::command::{PlayerCommand, PlayerEvent};
use crate::config::Config;
use crate::state::PlayerState;
use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use crossbeam::channel::unbounded;
use std::path::PathBuf;
use std::thread;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// MP3 files or directories to queue
    #[arg(value_name = "PATHS")]
    paths: Vec<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initial volume between 0 and 1
    #[arg(long)]
    volume: Option<f32>,
}

fn init_logging() -> Result<()> {
    let path = config::log_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging()?;

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(volume) = cli.volume {
        config.volume = volume.clamp(0., 1.);
    }

    // ui -> audio thread
    let (command_tx, command_rx) = unbounded::<PlayerCommand>();
    // audio thread -> ui
    let (event_tx, event_rx) = unbounded::<PlayerEvent>();

    // samples leaving the equalizer, read by the visualizer
    let window = AnalyserWindow::default();

    let device = config.output_device.clone();
    let player_window = window.clone();
    let volume = config.volume;
    let player = thread::Builder::new()
        .name("audio".to_string())
        .spawn(move || AudioPlayer::new(device, player_window, volume, event_tx).run(command_rx))?;

    let selection = track::expand_selection(&cli.paths);
    let result = tui::run(
        PlayerState::new(config.volume),
        selection,
        &config,
        command_tx.clone(),
        event_rx,
        window,
    );

    // the audio thread may already be gone if the ui bailed out
    let _ = command_tx.send(PlayerCommand::Shutdown);
    drop(command_tx);
    player
        .join()
        .map_err(|_| eyre!("audio thread panicked"))??;
    result
}
