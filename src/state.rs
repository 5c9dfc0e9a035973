use crate::command::{PlayerCommand, PlayerEvent, TrackInfo};
use crate::equalizer::{EqualizerPanel, Preset};
use crate::error::Error;
use crate::track::{Track, filter_tracks};
use crate::visualizer::{BAR_COUNT, Bars};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Playback {
    /// Nothing loaded.
    #[default]
    Idle,
    /// Waiting for the track's metadata.
    Loading,
    Playing,
    Paused,
    /// Paused at 0.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Equalizer,
    Playlist,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    FilesSelected(Vec<PathBuf>),
    Next,
    Previous,
    SelectSong(usize),
    TogglePlayPause,
    Stop,
    /// Position as a fraction of the progress bar, `0.0..=1.0`.
    Seek(f64),
    SetVolume(f32),
    TogglePanel(Panel),
    SelectPreset(Preset),
    SetBandGain { band: usize, gain: f32 },
    /// Fresh analyser bars for this frame.
    Frame(Bars),
    DismissAlert,
    Player(PlayerEvent),
    Quit,
}

#[derive(Debug, Clone)]
pub struct PlayerState {
    pub playback: Playback,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f32,
    pub visualizer_bars: Bars,
    pub show_eq_panel: bool,
    pub show_playlist_panel: bool,
    pub songs: Vec<Track>,
    /// `None` iff `songs` is empty.
    pub current_song_index: Option<usize>,
    pub track_info: Option<TrackInfo>,
    pub equalizer: EqualizerPanel,
    pub alert: Option<String>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl PlayerState {
    pub fn new(volume: f32) -> Self {
        Self {
            playback: Playback::Idle,
            current_time: 0.,
            duration: 0.,
            volume: volume.clamp(0., 1.),
            visualizer_bars: [0.; BAR_COUNT],
            show_eq_panel: false,
            show_playlist_panel: false,
            songs: Vec::new(),
            current_song_index: None,
            track_info: None,
            equalizer: EqualizerPanel::default(),
            alert: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback == Playback::Playing
    }

    pub fn current_song(&self) -> Option<&Track> {
        self.current_song_index.and_then(|i| self.songs.get(i))
    }

    /// Share of the track already played, `0.0` while the duration is unknown.
    pub fn progress(&self) -> f64 {
        if self.duration > 0. {
            (self.current_time / self.duration).clamp(0., 1.)
        } else {
            0.
        }
    }

    fn load_current(&mut self) -> Vec<PlayerCommand> {
        let Some(path) = self.current_song().map(|t| t.path.clone()) else {
            return Vec::new();
        };
        self.playback = Playback::Loading;
        self.current_time = 0.;
        self.duration = 0.;
        self.track_info = None;
        self.visualizer_bars = [0.; BAR_COUNT];
        vec![PlayerCommand::Load(path)]
    }

    fn jump(&mut self, index: usize) -> Vec<PlayerCommand> {
        if index >= self.songs.len() {
            return Vec::new();
        }
        self.current_song_index = Some(index);
        self.load_current()
    }

    fn step(&mut self, forward: bool) -> Vec<PlayerCommand> {
        let len = self.songs.len();
        if len == 0 {
            return Vec::new();
        }
        let current = self.current_song_index.unwrap_or(0);
        let index = if forward {
            (current + 1) % len
        } else {
            (current + len - 1) % len
        };
        self.jump(index)
    }
}

/// Applies one event and returns what the audio thread has to run.
/// The UI thread owns the only [`PlayerState`] and never mutates it elsewhere.
pub fn update(state: &mut PlayerState, event: Event) -> Vec<PlayerCommand> {
    match event {
        Event::FilesSelected(paths) => {
            let tracks = filter_tracks(&paths);
            if tracks.is_empty() {
                state.songs.clear();
                state.current_song_index = None;
                state.playback = Playback::Idle;
                state.current_time = 0.;
                state.duration = 0.;
                state.track_info = None;
                state.visualizer_bars = [0.; BAR_COUNT];
                state.alert = Some(Error::NoQualifyingFiles.to_string());
                log::warn!("none of {} selected files is playable", paths.len());
                return vec![PlayerCommand::Unload];
            }
            log::info!("playlist replaced with {} tracks", tracks.len());
            state.songs = tracks;
            state.jump(0)
        }
        Event::Next => state.step(true),
        Event::Previous => state.step(false),
        Event::SelectSong(index) => state.jump(index),
        Event::TogglePlayPause => {
            match state.playback {
                _ if state.songs.is_empty() => return Vec::new(),
                // metadata autoplays once it arrives
                Playback::Loading => return Vec::new(),
                // the last load failed, try the track again
                Playback::Idle => return state.load_current(),
                _ => (),
            }
            if state.is_playing() {
                state.playback = Playback::Paused;
                vec![PlayerCommand::Pause]
            } else {
                state.playback = Playback::Playing;
                vec![PlayerCommand::ResumeGraph, PlayerCommand::Play]
            }
        }
        Event::Stop => {
            state.current_time = 0.;
            if matches!(state.playback, Playback::Idle | Playback::Loading) {
                return Vec::new();
            }
            state.playback = Playback::Stopped;
            vec![PlayerCommand::Pause, PlayerCommand::Seek(Duration::ZERO)]
        }
        Event::Seek(fraction) => {
            if !(state.duration.is_finite() && state.duration > 0.) || fraction.is_nan() {
                return Vec::new();
            }
            let target = fraction.clamp(0., 1.) * state.duration;
            vec![PlayerCommand::Seek(Duration::from_secs_f64(target))]
        }
        Event::SetVolume(volume) => {
            state.volume = volume.clamp(0., 1.);
            vec![PlayerCommand::SetVolume(state.volume)]
        }
        Event::TogglePanel(panel) => {
            state.show_eq_panel = panel == Panel::Equalizer && !state.show_eq_panel;
            state.show_playlist_panel = panel == Panel::Playlist && !state.show_playlist_panel;
            Vec::new()
        }
        Event::SelectPreset(preset) => {
            let gains = state.equalizer.select_preset(preset);
            vec![PlayerCommand::ApplyGains(gains)]
        }
        Event::SetBandGain { band, gain } => {
            let gains = state.equalizer.set_band(band, gain);
            vec![PlayerCommand::ApplyGains(gains)]
        }
        Event::Frame(bars) => {
            state.visualizer_bars = if state.is_playing() {
                bars
            } else {
                [0.; BAR_COUNT]
            };
            Vec::new()
        }
        Event::DismissAlert => {
            state.alert = None;
            Vec::new()
        }
        Event::Player(event) => on_player_event(state, event),
        Event::Quit => vec![PlayerCommand::Shutdown],
    }
}

fn on_player_event(state: &mut PlayerState, event: PlayerEvent) -> Vec<PlayerCommand> {
    match event {
        PlayerEvent::MetadataLoaded(info) => {
            // a quicker selection may already have replaced this track
            if state.current_song().is_none_or(|t| t.path != info.path) {
                return Vec::new();
            }
            state.duration = info.duration;
            state.track_info = Some(info);
            state.playback = Playback::Playing;
            vec![
                PlayerCommand::SetupAudioGraph,
                PlayerCommand::ApplyGains(state.equalizer.gains()),
                PlayerCommand::Play,
            ]
        }
        PlayerEvent::TimeUpdate {
            current_time,
            duration,
        } => {
            if matches!(state.playback, Playback::Idle | Playback::Loading) {
                return Vec::new();
            }
            state.current_time = current_time;
            if duration.is_finite() && duration > 0. {
                state.duration = duration;
            }
            Vec::new()
        }
        PlayerEvent::Ended => state.step(true),
        PlayerEvent::PlayFailed(reason) => {
            log::error!("play failed: {}", reason);
            match state.playback {
                // nothing reached the player
                Playback::Loading => {
                    state.playback = Playback::Idle;
                    state.track_info = None;
                }
                Playback::Playing => state.playback = Playback::Paused,
                _ => (),
            }
            state.alert = Some(reason);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    fn loaded(n: usize) -> PlayerState {
        let mut state = PlayerState::default();
        let names: Vec<String> = (0..n).map(|i| format!("track{i}.mp3")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        update(&mut state, Event::FilesSelected(paths(&names)));
        state
    }

    fn metadata(state: &PlayerState, duration: f64) -> Event {
        Event::Player(PlayerEvent::MetadataLoaded(TrackInfo {
            path: state.current_song().unwrap().path.clone(),
            sample_rate: 44100,
            channels: 2,
            duration,
            kbps: Some(320),
        }))
    }

    #[test]
    fn selecting_files_loads_first_track() {
        let mut state = PlayerState::default();
        let cmds = update(
            &mut state,
            Event::FilesSelected(paths(&["a.mp3", "notes.txt", "b.MP3"])),
        );
        assert_eq!(state.songs.len(), 2);
        assert_eq!(state.current_song_index, Some(0));
        assert_eq!(state.playback, Playback::Loading);
        assert_eq!(cmds, vec![PlayerCommand::Load(PathBuf::from("a.mp3"))]);
    }

    #[test]
    fn no_mp3_clears_playlist_and_alerts() {
        let mut state = loaded(2);
        let cmds = update(
            &mut state,
            Event::FilesSelected(paths(&["a.wav", "b.flac", "c"])),
        );
        assert!(state.songs.is_empty());
        assert_eq!(state.current_song_index, None);
        assert!(!state.is_playing());
        assert!(state.alert.is_some());
        assert_eq!(cmds, vec![PlayerCommand::Unload]);

        update(&mut state, Event::DismissAlert);
        assert!(state.alert.is_none());
    }

    #[test]
    fn next_then_previous_returns_to_start() {
        for len in 1..6 {
            for start in 0..len {
                let mut state = loaded(len);
                update(&mut state, Event::SelectSong(start));
                update(&mut state, Event::Next);
                update(&mut state, Event::Previous);
                assert_eq!(state.current_song_index, Some(start));
            }
        }
    }

    #[test]
    fn next_wraps_after_last_track() {
        let mut state = loaded(3);
        assert_eq!(state.current_song_index, Some(0));
        update(&mut state, Event::Next);
        update(&mut state, Event::Next);
        assert_eq!(state.current_song_index, Some(2));
        let cmds = update(&mut state, Event::Next);
        assert_eq!(state.current_song_index, Some(0));
        assert_eq!(cmds, vec![PlayerCommand::Load(PathBuf::from("track0.mp3"))]);
    }

    #[test]
    fn previous_wraps_to_last_track() {
        let mut state = loaded(3);
        update(&mut state, Event::Previous);
        assert_eq!(state.current_song_index, Some(2));
    }

    #[test]
    fn navigation_on_empty_playlist_is_noop() {
        let mut state = PlayerState::default();
        assert!(update(&mut state, Event::Next).is_empty());
        assert!(update(&mut state, Event::Previous).is_empty());
        assert!(update(&mut state, Event::TogglePlayPause).is_empty());
        assert!(update(&mut state, Event::SelectSong(0)).is_empty());
        assert_eq!(state.current_song_index, None);
        assert_eq!(state.playback, Playback::Idle);
    }

    #[test]
    fn ended_advances_and_loops() {
        let mut state = loaded(2);
        update(&mut state, Event::SelectSong(1));
        let cmds = update(&mut state, Event::Player(PlayerEvent::Ended));
        assert_eq!(state.current_song_index, Some(0));
        assert_eq!(cmds, vec![PlayerCommand::Load(PathBuf::from("track0.mp3"))]);
    }

    #[test]
    fn metadata_wires_graph_and_autoplays() {
        let mut state = loaded(1);
        update(&mut state, Event::SelectPreset(Preset::Rock));
        let loaded_event = metadata(&state, 180.);
        let cmds = update(&mut state, loaded_event);
        assert!(state.is_playing());
        assert_eq!(state.duration, 180.);
        assert_eq!(
            cmds,
            vec![
                PlayerCommand::SetupAudioGraph,
                PlayerCommand::ApplyGains(Preset::Rock.gains()),
                PlayerCommand::Play,
            ]
        );
    }

    #[test]
    fn stale_metadata_is_ignored() {
        let mut state = loaded(2);
        let stale = metadata(&state, 60.);
        update(&mut state, Event::Next);
        assert!(update(&mut state, stale).is_empty());
        assert_eq!(state.playback, Playback::Loading);
    }

    #[test]
    fn play_pause_stop_cycle() {
        let mut state = loaded(1);
        let loaded_event = metadata(&state, 100.);
        update(&mut state, loaded_event);
        update(
            &mut state,
            Event::Player(PlayerEvent::TimeUpdate {
                current_time: 42.,
                duration: 100.,
            }),
        );

        assert_eq!(update(&mut state, Event::TogglePlayPause), vec![PlayerCommand::Pause]);
        assert_eq!(state.playback, Playback::Paused);
        assert_eq!(
            update(&mut state, Event::TogglePlayPause),
            vec![PlayerCommand::ResumeGraph, PlayerCommand::Play]
        );
        assert!(state.is_playing());

        let cmds = update(&mut state, Event::Stop);
        assert_eq!(state.playback, Playback::Stopped);
        assert_eq!(state.current_time, 0.);
        assert_eq!(cmds, vec![PlayerCommand::Pause, PlayerCommand::Seek(Duration::ZERO)]);

        update(&mut state, Event::TogglePlayPause);
        assert!(state.is_playing());
    }

    #[test]
    fn seek_uses_fraction_of_duration() {
        let mut state = loaded(1);
        assert!(update(&mut state, Event::Seek(0.5)).is_empty());

        let loaded_event = metadata(&state, 200.);

        update(&mut state, loaded_event);
        assert_eq!(
            update(&mut state, Event::Seek(0.25)),
            vec![PlayerCommand::Seek(Duration::from_secs(50))]
        );
        assert_eq!(
            update(&mut state, Event::Seek(1.5)),
            vec![PlayerCommand::Seek(Duration::from_secs(200))]
        );
    }

    #[test]
    fn volume_is_clamped() {
        let mut state = PlayerState::default();
        assert_eq!(update(&mut state, Event::SetVolume(1.7)), vec![PlayerCommand::SetVolume(1.)]);
        update(&mut state, Event::SetVolume(-0.2));
        assert_eq!(state.volume, 0.);
    }

    #[test]
    fn panels_are_mutually_exclusive() {
        let mut state = PlayerState::default();
        update(&mut state, Event::TogglePanel(Panel::Playlist));
        assert!(state.show_playlist_panel);

        update(&mut state, Event::TogglePanel(Panel::Equalizer));
        assert!(state.show_eq_panel);
        assert!(!state.show_playlist_panel);

        update(&mut state, Event::TogglePanel(Panel::Equalizer));
        assert!(!state.show_eq_panel);
        assert!(!state.show_playlist_panel);
    }

    #[test]
    fn slider_after_preset_switches_to_custom() {
        let mut state = PlayerState::default();
        update(&mut state, Event::SelectPreset(Preset::Rock));
        assert_eq!(state.equalizer.gains().at_frequency(16000), Some(10.));

        let cmds = update(&mut state, Event::SetBandGain { band: 0, gain: -5. });
        assert_eq!(state.equalizer.preset().name(), "Custom");
        assert_eq!(state.equalizer.gains().at_frequency(16000), Some(10.));
        assert_eq!(cmds, vec![PlayerCommand::ApplyGains(state.equalizer.gains())]);
    }

    #[test]
    fn bars_decay_when_not_playing() {
        let mut state = loaded(1);
        update(&mut state, Event::Frame([100.; BAR_COUNT]));
        assert_eq!(state.visualizer_bars, [0.; BAR_COUNT]);

        let loaded_event = metadata(&state, 10.);

        update(&mut state, loaded_event);
        update(&mut state, Event::Frame([100.; BAR_COUNT]));
        assert_eq!(state.visualizer_bars, [100.; BAR_COUNT]);
    }

    #[test]
    fn play_failure_surfaces_and_clears_flag() {
        let mut state = loaded(1);
        let loaded_event = metadata(&state, 10.);
        update(&mut state, loaded_event);
        update(
            &mut state,
            Event::Player(PlayerEvent::PlayFailed("no output device".into())),
        );
        assert!(!state.is_playing());
        assert_eq!(state.alert.as_deref(), Some("no output device"));
    }

    #[test]
    fn failed_load_cannot_fake_playback() {
        let mut state = loaded(1);
        update(
            &mut state,
            Event::Player(PlayerEvent::PlayFailed("cannot decode broken.mp3".into())),
        );
        assert_eq!(state.playback, Playback::Idle);
        assert!(state.alert.is_some());

        assert!(update(&mut state, Event::Stop).is_empty());
        let cmds = update(&mut state, Event::TogglePlayPause);
        assert!(!state.is_playing());
        assert_eq!(state.playback, Playback::Loading);
        assert_eq!(cmds, vec![PlayerCommand::Load(PathBuf::from("track0.mp3"))]);
    }

    #[test]
    fn toggle_while_loading_waits_for_metadata() {
        let mut state = loaded(1);
        assert!(update(&mut state, Event::TogglePlayPause).is_empty());
        assert_eq!(state.playback, Playback::Loading);
    }

    #[test]
    fn reselecting_current_track_restarts_it() {
        let mut state = loaded(2);
        let loaded_event = metadata(&state, 30.);
        update(&mut state, loaded_event);
        let cmds = update(&mut state, Event::SelectSong(0));
        assert_eq!(state.playback, Playback::Loading);
        assert_eq!(cmds, vec![PlayerCommand::Load(PathBuf::from("track0.mp3"))]);
    }
}
