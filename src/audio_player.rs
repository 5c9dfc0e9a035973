use crate::analyser::AnalyserWindow;
use crate::audio_graph::AudioGraph;
use crate::command::{PlayerCommand, PlayerEvent, TrackInfo};
use crate::error::Error;
use color_eyre::Result;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use rodio::{Decoder, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

type TrackSource = Decoder<BufReader<File>>;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const TIME_UPDATE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, PartialEq)]
pub enum PlaybackState {
    Playing,
    Paused,
}

/// Owns everything that touches the output device. Lives on its own thread and
/// talks to the UI only through channels.
pub struct AudioPlayer {
    graph: AudioGraph,
    // decoded but not yet routed into the graph
    pending: Option<TrackSource>,
    connected: bool,
    // the output could not be opened, the Play queued behind it is dropped
    setup_failed: bool,
    state: PlaybackState,
    duration: f64,
    volume: f32,
    last_update: Instant,
    event_tx: Sender<PlayerEvent>,
}

impl AudioPlayer {
    pub fn new(
        device: Option<String>,
        window: AnalyserWindow,
        volume: f32,
        event_tx: Sender<PlayerEvent>,
    ) -> Self {
        Self {
            graph: AudioGraph::new(device, window),
            pending: None,
            connected: false,
            setup_failed: false,
            state: PlaybackState::Paused,
            duration: 0.,
            volume,
            last_update: Instant::now(),
            event_tx,
        }
    }

    pub fn run(&mut self, command_rx: Receiver<PlayerCommand>) -> Result<()> {
        loop {
            match command_rx.recv_timeout(POLL_INTERVAL) {
                Ok(PlayerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    self.graph.disconnect();
                    log::info!("audio thread stopped");
                    return Ok(());
                }
                Ok(cmd) => self.handle(cmd),
                Err(RecvTimeoutError::Timeout) => (),
            }
            self.report_progress();
        }
    }

    fn handle(&mut self, cmd: PlayerCommand) {
        match cmd {
            PlayerCommand::Load(path) => self.load(path),
            PlayerCommand::Unload => {
                self.pending = None;
                self.connected = false;
                self.state = PlaybackState::Paused;
                self.graph.disconnect();
            }
            PlayerCommand::SetupAudioGraph => {
                if let Err(err) = self.graph.setup_once() {
                    self.setup_failed = true;
                    self.fail(format!("Cannot open audio output: {}", err));
                    return;
                }
                self.graph.build_filter_chain();
                self.graph.set_volume(self.volume);
            }
            PlayerCommand::ApplyGains(gains) => self.graph.apply_gains(&gains),
            PlayerCommand::ResumeGraph => {
                if self.graph.is_set_up() {
                    self.graph.resume();
                }
            }
            PlayerCommand::Play => self.play(),
            PlayerCommand::Pause => {
                self.graph.suspend();
                self.state = PlaybackState::Paused;
            }
            PlayerCommand::Seek(pos) => {
                if !self.connected {
                    return;
                }
                let pos = if self.duration > 0. {
                    pos.min(Duration::from_secs_f64(self.duration))
                } else {
                    pos
                };
                self.graph.seek(pos);
                self.send_time_update();
            }
            PlayerCommand::SetVolume(volume) => {
                self.volume = volume;
                self.graph.set_volume(volume);
            }
            PlayerCommand::Shutdown => (),
        }
    }

    fn load(&mut self, path: PathBuf) {
        log::info!("loading {}", path.display());
        // the previous decoder and its file handle go away here
        self.graph.disconnect();
        self.pending = None;
        self.connected = false;
        self.state = PlaybackState::Paused;

        let opened = File::open(&path)
            .map_err(|err| Error::Unreadable(path.clone(), err.to_string()).to_string())
            .and_then(|file| {
                TrackSource::try_from(file)
                    .map_err(|err| Error::Unreadable(path.clone(), err.to_string()).to_string())
            });
        let source = match opened {
            Ok(source) => source,
            Err(reason) => return self.fail(reason),
        };

        let mut info = match probe(&path) {
            Ok(info) => info,
            Err(err) => {
                log::warn!("probe failed for {}: {}", path.display(), err);
                TrackInfo {
                    path: path.clone(),
                    sample_rate: source.sample_rate(),
                    channels: source.channels(),
                    ..Default::default()
                }
            }
        };
        if info.duration <= 0. {
            info.duration = source.total_duration().map_or(0., |d| d.as_secs_f64());
        }

        self.duration = info.duration;
        self.pending = Some(source);
        self.send(PlayerEvent::MetadataLoaded(info));
    }

    fn play(&mut self) {
        if std::mem::take(&mut self.setup_failed) {
            return;
        }
        if let Some(source) = self.pending.take() {
            if let Err(err) = self.graph.connect(source) {
                self.fail(format!("Cannot start playback: {}", err));
                return;
            }
            self.graph.set_volume(self.volume);
            self.connected = true;
        }
        if !self.connected {
            return self.fail("Nothing loaded to play".to_string());
        }
        self.graph.resume();
        self.state = PlaybackState::Playing;
        self.send_time_update();
    }

    fn report_progress(&mut self) {
        if !self.connected {
            return;
        }
        if self.graph.is_drained() {
            self.connected = false;
            self.state = PlaybackState::Paused;
            log::debug!("track ended");
            self.send(PlayerEvent::Ended);
            return;
        }
        if self.state == PlaybackState::Playing && self.last_update.elapsed() >= TIME_UPDATE_INTERVAL
        {
            self.send_time_update();
        }
    }

    fn send_time_update(&mut self) {
        self.last_update = Instant::now();
        let current_time = self.graph.position().as_secs_f64();
        self.send(PlayerEvent::TimeUpdate {
            current_time,
            duration: self.duration,
        });
    }

    fn fail(&mut self, reason: String) {
        log::error!("{}", reason);
        self.state = PlaybackState::Paused;
        self.send(PlayerEvent::PlayFailed(reason));
    }

    fn send(&self, event: PlayerEvent) {
        if let Err(err) = self.event_tx.send(event) {
            log::debug!("ui is gone, dropping {:?}", err.into_inner());
        }
    }
}

/// Reads sample rate, channels and duration without decoding the audio.
pub fn probe(path: &Path) -> Result<TrackInfo> {
    let src = File::open(path)?;
    let byte_len = src.metadata().map(|m| m.len()).unwrap_or(0);
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    // Create a probe hint using the file's extension.
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();
    let probed = symphonia::default::get_probe().format(&hint, mss, &fmt_opts, &meta_opts)?;

    // Find the first audio track with a known (decodeable) codec.
    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::NoAudioTrack(path.to_path_buf()))?;
    let params = &track.codec_params;

    let sample_rate = params.sample_rate.unwrap_or(0);
    let channels = params.channels.map_or(0, |c| c.count() as u16);
    let duration = match (params.n_frames, params.time_base) {
        (Some(frames), Some(tb)) => {
            let time = tb.calc_time(frames);
            time.seconds as f64 + time.frac
        }
        (Some(frames), None) if sample_rate > 0 => frames as f64 / sample_rate as f64,
        _ => 0.,
    };
    let kbps = (duration > 0.).then(|| (byte_len as f64 * 8. / duration / 1000.).round() as u32);

    Ok(TrackInfo {
        path: path.to_path_buf(),
        sample_rate,
        channels,
        duration,
        kbps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    #[test]
    fn missing_file_reports_play_failure() {
        let (tx, rx) = unbounded();
        let mut player = AudioPlayer::new(None, AnalyserWindow::default(), 0.5, tx);
        player.handle(PlayerCommand::Load(PathBuf::from("/definitely/not/here.mp3")));
        match rx.try_recv() {
            Ok(PlayerEvent::PlayFailed(reason)) => assert!(reason.contains("here.mp3")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(player.pending.is_none());
    }

    #[test]
    fn commands_before_setup_are_harmless() {
        let (tx, rx) = unbounded();
        let mut player = AudioPlayer::new(None, AnalyserWindow::default(), 0.5, tx);
        player.handle(PlayerCommand::Pause);
        player.handle(PlayerCommand::ResumeGraph);
        player.handle(PlayerCommand::Seek(Duration::from_secs(3)));
        player.handle(PlayerCommand::SetVolume(0.2));
        player.handle(PlayerCommand::Unload);
        assert!(rx.try_recv().is_err());
        assert_eq!(player.volume, 0.2);
        assert_eq!(player.state, PlaybackState::Paused);
    }

    #[test]
    fn play_without_a_track_reports_failure() {
        let (tx, rx) = unbounded();
        let mut player = AudioPlayer::new(None, AnalyserWindow::default(), 0.5, tx);
        player.handle(PlayerCommand::Load(PathBuf::from("/definitely/not/here.mp3")));
        assert!(matches!(rx.try_recv(), Ok(PlayerEvent::PlayFailed(_))));

        player.handle(PlayerCommand::Play);
        assert!(matches!(rx.try_recv(), Ok(PlayerEvent::PlayFailed(_))));
        assert_eq!(player.state, PlaybackState::Paused);
    }

    #[test]
    fn play_after_failed_setup_is_dropped_once() {
        let (tx, rx) = unbounded();
        let mut player = AudioPlayer::new(None, AnalyserWindow::default(), 0.5, tx);
        player.setup_failed = true;
        player.handle(PlayerCommand::Play);
        assert!(rx.try_recv().is_err());
        assert!(!player.setup_failed);

        player.handle(PlayerCommand::Play);
        assert!(matches!(rx.try_recv(), Ok(PlayerEvent::PlayFailed(_))));
    }

    #[test]
    fn shutdown_ends_the_loop() {
        let (tx, _rx) = unbounded();
        let (cmd_tx, cmd_rx) = unbounded();
        let mut player = AudioPlayer::new(None, AnalyserWindow::default(), 0.5, tx);
        cmd_tx.send(PlayerCommand::Shutdown).unwrap();
        assert!(player.run(cmd_rx).is_ok());
    }

    #[test]
    fn probe_rejects_non_audio() {
        let path = std::env::temp_dir().join(format!("winhrach-probe-{}.mp3", std::process::id()));
        std::fs::write(&path, b"definitely not an mpeg stream").unwrap();
        assert!(probe(&path).is_err());
        std::fs::remove_file(&path).unwrap();
    }
}
