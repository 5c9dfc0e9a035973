//! Output stream, equalizer filter chain and analyser tap.
//!
//! Every decoded track runs through `source -> filter 1 -> ... -> filter 7 ->
//! analyser -> sink`. The output stream and the filter bank are created once
//! per session; tracks plug into them as they are loaded.
use crate::analyser::AnalyserWindow;
use crate::equalizer::{BAND_COUNT, BANDS, GainVector};
use crate::error::Error;
use color_eyre::Result;
use cpal::traits::{DeviceTrait, HostTrait};
use rodio::Source;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

pub const FILTER_Q: f32 = 1.;
const TAP_BLOCK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coefficients {
    const IDENTITY: Coefficients = Coefficients {
        b0: 1.,
        b1: 0.,
        b2: 0.,
        a1: 0.,
        a2: 0.,
    };

    /// Peaking EQ from the audio EQ cookbook. Bands at or above Nyquist pass through.
    fn peaking(sample_rate: u32, frequency: f32, q: f32, gain_db: f32) -> Self {
        let nyquist = sample_rate as f32 / 2.;
        if gain_db == 0. || frequency <= 0. || frequency >= nyquist {
            return Self::IDENTITY;
        }
        let a = 10f32.powf(gain_db / 40.);
        let omega = 2. * std::f32::consts::PI * frequency / sample_rate as f32;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2. * q);

        let a0 = 1. + alpha / a;
        Self {
            b0: (1. + alpha * a) / a0,
            b1: (-2. * cos_omega) / a0,
            b2: (1. - alpha * a) / a0,
            a1: (-2. * cos_omega) / a0,
            a2: (1. - alpha / a) / a0,
        }
    }
}

/// One biquad with separate history per channel.
#[derive(Debug, Clone)]
struct Biquad {
    coeffs: Coefficients,
    // x1, x2, y1, y2 per channel
    history: Vec<[f32; 4]>,
}

impl Biquad {
    fn new(channels: usize) -> Self {
        Self {
            coeffs: Coefficients::IDENTITY,
            history: vec![[0.; 4]; channels.max(1)],
        }
    }

    #[inline]
    fn process(&mut self, channel: usize, x: f32) -> f32 {
        let c = self.coeffs;
        let h = &mut self.history[channel];
        let y = c.b0 * x + c.b1 * h[0] + c.b2 * h[1] - c.a1 * h[2] - c.a2 * h[3];
        *h = [x, h[0], y, h[2]];
        y
    }

    fn reset(&mut self) {
        self.history.iter_mut().for_each(|h| *h = [0.; 4]);
    }
}

/// Band gains shared between the player thread and the audio callback.
#[derive(Debug, Default)]
struct BankParams {
    gains: [AtomicU32; BAND_COUNT],
    version: AtomicU64,
}

/// The persistent filter nodes: one peaking filter per band, Q = 1, starting flat.
#[derive(Debug, Clone)]
pub struct FilterBank {
    params: Arc<BankParams>,
}

impl FilterBank {
    fn new() -> Self {
        let params = BankParams::default();
        for gain in &params.gains {
            gain.store(0f32.to_bits(), Ordering::Relaxed);
        }
        Self {
            params: Arc::new(params),
        }
    }

    pub fn set_gain(&self, band: usize, gain_db: f32) {
        if let Some(gain) = self.params.gains.get(band) {
            gain.store(gain_db.to_bits(), Ordering::Relaxed);
            self.params.version.fetch_add(1, Ordering::Release);
        }
    }

    pub fn gain(&self, band: usize) -> Option<f32> {
        self.params
            .gains
            .get(band)
            .map(|g| f32::from_bits(g.load(Ordering::Relaxed)))
    }

    fn version(&self) -> u64 {
        self.params.version.load(Ordering::Acquire)
    }

    /// Puts `source` behind the seven filters of this bank.
    pub fn chain<S: Source>(&self, source: S) -> Equalized<S> {
        let channels = source.channels() as usize;
        let mut eq = Equalized {
            inner: source,
            bank: self.clone(),
            filters: (0..BAND_COUNT).map(|_| Biquad::new(channels)).collect(),
            seen_version: u64::MAX,
            channels: channels.max(1),
            channel: 0,
        };
        eq.refresh();
        eq
    }
}

pub struct Equalized<S> {
    inner: S,
    bank: FilterBank,
    filters: Vec<Biquad>,
    seen_version: u64,
    channels: usize,
    channel: usize,
}

impl<S: Source> Equalized<S> {
    fn refresh(&mut self) {
        let version = self.bank.version();
        if version == self.seen_version {
            return;
        }
        let rate = self.inner.sample_rate();
        for (band, filter) in self.filters.iter_mut().enumerate() {
            let gain = self.bank.gain(band).unwrap_or(0.);
            filter.coeffs = Coefficients::peaking(rate, BANDS[band] as f32, FILTER_Q, gain);
        }
        self.seen_version = version;
    }
}

impl<S: Source> Iterator for Equalized<S> {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.channel == 0 {
            self.refresh();
        }
        let mut sample = self.inner.next()?;
        for filter in &mut self.filters {
            sample = filter.process(self.channel, sample);
        }
        self.channel = (self.channel + 1) % self.channels;
        Some(sample)
    }
}

impl<S: Source> Source for Equalized<S> {
    fn current_span_len(&self) -> Option<usize> {
        self.inner.current_span_len()
    }

    fn channels(&self) -> rodio::ChannelCount {
        self.inner.channels()
    }

    fn sample_rate(&self) -> rodio::SampleRate {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }

    fn try_seek(&mut self, pos: Duration) -> Result<(), rodio::source::SeekError> {
        self.inner.try_seek(pos)?;
        self.filters.iter_mut().for_each(Biquad::reset);
        self.channel = 0;
        Ok(())
    }
}

/// Passes samples through untouched while feeding a mono mix to the analyser.
pub struct AnalyserTap<S> {
    inner: S,
    window: AnalyserWindow,
    channels: usize,
    channel: usize,
    frame_sum: f32,
    block: Vec<f32>,
}

impl<S: Source> AnalyserTap<S> {
    pub fn new(inner: S, window: AnalyserWindow) -> Self {
        window.set_sample_rate(inner.sample_rate());
        let channels = (inner.channels() as usize).max(1);
        Self {
            inner,
            window,
            channels,
            channel: 0,
            frame_sum: 0.,
            block: Vec::with_capacity(TAP_BLOCK),
        }
    }
}

impl<S: Source> Iterator for AnalyserTap<S> {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        let sample = self.inner.next()?;
        self.frame_sum += sample;
        self.channel += 1;
        if self.channel == self.channels {
            self.block.push(self.frame_sum / self.channels as f32);
            self.frame_sum = 0.;
            self.channel = 0;
            if self.block.len() == TAP_BLOCK {
                self.window.push_block(&self.block);
                self.block.clear();
            }
        }
        Some(sample)
    }
}

impl<S: Source> Source for AnalyserTap<S> {
    fn current_span_len(&self) -> Option<usize> {
        self.inner.current_span_len()
    }

    fn channels(&self) -> rodio::ChannelCount {
        self.inner.channels()
    }

    fn sample_rate(&self) -> rodio::SampleRate {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }

    fn try_seek(&mut self, pos: Duration) -> Result<(), rodio::source::SeekError> {
        self.inner.try_seek(pos)?;
        self.channel = 0;
        self.frame_sum = 0.;
        self.block.clear();
        Ok(())
    }
}

/// The "audio context" of the player.
pub struct AudioGraph {
    device: Option<String>,
    stream: Option<rodio::OutputStream>,
    sink: Option<rodio::Sink>,
    bank: Option<FilterBank>,
    window: AnalyserWindow,
}

impl AudioGraph {
    pub fn new(device: Option<String>, window: AnalyserWindow) -> Self {
        Self {
            device,
            stream: None,
            sink: None,
            bank: None,
            window,
        }
    }

    pub fn is_set_up(&self) -> bool {
        self.sink.is_some()
    }

    /// Opens the output stream and its sink. Later calls do nothing.
    pub fn setup_once(&mut self) -> Result<()> {
        if self.sink.is_some() {
            return Ok(());
        }
        let mut stream = match &self.device {
            Some(name) => {
                let host = cpal::default_host();
                let device = host
                    .output_devices()?
                    .find(|d| d.name().is_ok_and(|n| &n == name))
                    .ok_or_else(|| Error::DeviceNotFound(name.clone()))?;
                rodio::OutputStreamBuilder::from_device(device)?.open_stream()?
            }
            None => rodio::OutputStreamBuilder::open_default_stream()?,
        };
        stream.log_on_drop(false);
        let sink = rodio::Sink::connect_new(stream.mixer());
        sink.pause();
        log::info!("audio output opened");
        self.stream = Some(stream);
        self.sink = Some(sink);
        Ok(())
    }

    /// Creates the seven flat peaking filters. Later calls do nothing.
    pub fn build_filter_chain(&mut self) {
        if self.bank.is_some() {
            return;
        }
        log::debug!("filter chain built at {:?} Hz, Q = {}", BANDS, FILTER_Q);
        self.bank = Some(FilterBank::new());
    }

    /// Replaces whatever is queued with `source` routed through the chain.
    pub fn connect<S: Source + Send + 'static>(&mut self, source: S) -> Result<()> {
        self.setup_once()?;
        self.build_filter_chain();
        let (Some(sink), Some(bank)) = (&self.sink, &self.bank) else {
            return Ok(());
        };
        self.window.clear();
        sink.stop();
        sink.clear();
        sink.append(AnalyserTap::new(bank.chain(source), self.window.clone()));
        Ok(())
    }

    /// Sets each existing filter's gain right away, without ramping.
    pub fn apply_gains(&self, gains: &GainVector) {
        let Some(bank) = &self.bank else {
            return;
        };
        for (band, gain) in gains.as_array().iter().enumerate() {
            bank.set_gain(band, *gain);
        }
        log::debug!("equalizer gains applied: {:?}", gains.as_array());
    }

    pub fn resume(&self) {
        if let Some(sink) = &self.sink {
            sink.play();
        }
    }

    pub fn suspend(&self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    pub fn seek(&self, pos: Duration) {
        if let Some(sink) = &self.sink {
            if let Err(err) = sink.try_seek(pos) {
                log::warn!("seek to {:?} failed: {}", pos, err);
            }
        }
    }

    pub fn set_volume(&self, volume: f32) {
        if let Some(sink) = &self.sink {
            sink.set_volume(volume);
        }
    }

    pub fn position(&self) -> Duration {
        self.sink.as_ref().map(|s| s.get_pos()).unwrap_or_default()
    }

    /// True once the queued track has played to its end.
    pub fn is_drained(&self) -> bool {
        self.sink.as_ref().is_none_or(|s| s.empty())
    }

    /// Drops the queued track and with it the open file.
    pub fn disconnect(&self) {
        if let Some(sink) = &self.sink {
            sink.stop();
            sink.clear();
        }
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rodio::buffer::SamplesBuffer;

    fn sine(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2. * std::f32::consts::PI * freq * i as f32 / rate as f32).sin() * 0.25)
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn flat_bank_is_transparent() {
        let input = sine(440., 44100, 4096);
        let bank = FilterBank::new();
        let output: Vec<f32> = bank.chain(SamplesBuffer::new(1, 44100, input.clone())).collect();
        assert_eq!(output, input);
    }

    #[test]
    fn boost_raises_level_at_center() {
        let input = sine(1000., 44100, 44100);
        let bank = FilterBank::new();
        bank.set_gain(3, 12.);
        let output: Vec<f32> = bank.chain(SamplesBuffer::new(1, 44100, input.clone())).collect();

        // skip the transient
        let gain_db = 20. * (rms(&output[4410..]) / rms(&input[4410..])).log10();
        assert!((gain_db - 12.).abs() < 0.5, "measured {gain_db} dB");
    }

    #[test]
    fn gain_change_reaches_running_chain() {
        let bank = FilterBank::new();
        let mut chain = bank.chain(SamplesBuffer::new(1, 44100, sine(60., 44100, 32768)));
        let before: Vec<f32> = chain.by_ref().take(16384).collect();
        bank.set_gain(0, -20.);
        let after: Vec<f32> = chain.collect();
        assert!(rms(&after[8192..]) < rms(&before[8192..]) * 0.5);
    }

    #[test]
    fn bands_above_nyquist_pass_through() {
        assert_eq!(
            Coefficients::peaking(22050, 16000., FILTER_Q, 10.),
            Coefficients::IDENTITY
        );
    }

    #[test]
    fn stereo_channels_keep_separate_history() {
        let left = sine(1000., 44100, 2048);
        let interleaved: Vec<f32> = left.iter().flat_map(|&l| [l, 0.]).collect();
        let bank = FilterBank::new();
        bank.set_gain(3, 10.);
        let output: Vec<f32> = bank.chain(SamplesBuffer::new(2, 44100, interleaved)).collect();
        assert!(output.iter().skip(1).step_by(2).all(|&r| r == 0.));
    }

    #[test]
    fn tap_forwards_samples_unchanged() {
        let input = sine(440., 44100, TAP_BLOCK * 4);
        let window = AnalyserWindow::default();
        let tap = AnalyserTap::new(SamplesBuffer::new(1, 44100, input.clone()), window);
        assert_eq!(tap.collect::<Vec<_>>(), input);
    }

    #[test]
    fn gains_without_bank_are_ignored() {
        let mut graph = AudioGraph::new(None, AnalyserWindow::default());
        graph.apply_gains(&GainVector::new([5.; BAND_COUNT]));
        assert!(graph.bank.is_none());

        graph.build_filter_chain();
        graph.apply_gains(&GainVector::new([5.; BAND_COUNT]));
        let bank = graph.bank.clone().unwrap();
        // a second build keeps the existing filters
        graph.build_filter_chain();
        assert_eq!(graph.bank.as_ref().unwrap().gain(6), Some(5.));
        assert_eq!(bank.gain(0), Some(5.));
    }
}
