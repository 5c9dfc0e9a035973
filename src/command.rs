use crate::equalizer::GainVector;
use std::path::PathBuf;
use std::time::Duration;

/// UI -> audio thread
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    /// Open and probe a file. Answered by `MetadataLoaded` or `PlayFailed`.
    Load(PathBuf),
    /// Drop the current track.
    Unload,
    SetupAudioGraph,
    ApplyGains(GainVector),
    /// Resume the output if it was suspended.
    ResumeGraph,
    Play,
    Pause,
    Seek(Duration),
    SetVolume(f32),
    Shutdown,
}

/// Audio thread -> UI
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    MetadataLoaded(TrackInfo),
    TimeUpdate { current_time: f64, duration: f64 },
    Ended,
    PlayFailed(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackInfo {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    /// Seconds, 0 when unknown.
    pub duration: f64,
    /// Average bitrate estimated from the file size, if the duration is known.
    pub kbps: Option<u32>,
}

impl TrackInfo {
    pub fn is_stereo(&self) -> bool {
        self.channels >= 2
    }
}
