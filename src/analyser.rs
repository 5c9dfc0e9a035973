use ringbuffer::{AllocRingBuffer, RingBuffer};
use spectrum_analyzer::scaling::divide_by_N;
use spectrum_analyzer::windows::hann_window;
use spectrum_analyzer::{FrequencyLimit, samples_fft_to_spectrum};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

// magnitudes are smoothed over time, converted to dB and mapped from
// [MIN_DB, MAX_DB] onto 0..=255, like a browser analyser node
pub const FFT_SIZE: usize = 2048;
pub const BIN_COUNT: usize = FFT_SIZE / 2;
pub const MIN_DB: f32 = -100.;
pub const MAX_DB: f32 = -30.;
pub const SMOOTHING: f32 = 0.8;

pub type RBuffer = Arc<Mutex<AllocRingBuffer<f32>>>;

/// Handle to the most recent [`FFT_SIZE`] samples of the output.
#[derive(Clone)]
pub struct AnalyserWindow {
    samples: RBuffer,
    sample_rate: Arc<AtomicU32>,
}

impl Default for AnalyserWindow {
    fn default() -> Self {
        Self {
            samples: Arc::new(Mutex::new(AllocRingBuffer::new(FFT_SIZE))),
            sample_rate: Arc::new(AtomicU32::new(44100)),
        }
    }
}

impl AnalyserWindow {
    /// Appends a block of mono samples. Skips the block rather than blocking
    /// the audio callback when the UI is reading.
    pub fn push_block(&self, block: &[f32]) {
        if let Ok(mut buf) = self.samples.try_lock() {
            for &s in block {
                buf.push(s);
            }
        }
    }

    pub fn set_sample_rate(&self, rate: u32) {
        if rate > 0 {
            self.sample_rate.store(rate, Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        let mut buf = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        buf.clear();
    }

    fn snapshot(&self) -> Vec<f32> {
        let buf = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let mut samples = vec![0.; FFT_SIZE - buf.len()];
        samples.extend(buf.to_vec());
        samples
    }
}

/// UI-side reader. Keeps the smoothing state between frames.
pub struct Analyser {
    window: AnalyserWindow,
    smoothed: Vec<f32>,
}

impl Analyser {
    pub fn new(window: AnalyserWindow) -> Self {
        Self {
            window,
            smoothed: vec![0.; BIN_COUNT],
        }
    }

    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        let samples = self.window.snapshot();
        let rate = self.window.sample_rate.load(Ordering::Relaxed);
        let windowed = hann_window(&samples);

        let spectrum = match samples_fft_to_spectrum(
            &windowed,
            rate,
            FrequencyLimit::All,
            Some(&divide_by_N),
        ) {
            Ok(spectrum) => spectrum,
            Err(err) => {
                log::debug!("spectrum unavailable: {:?}", err);
                return vec![0; BIN_COUNT];
            }
        };

        for (smoothed, (_, magnitude)) in self.smoothed.iter_mut().zip(spectrum.data().iter()) {
            *smoothed = SMOOTHING * *smoothed + (1. - SMOOTHING) * magnitude.val();
        }
        self.smoothed.iter().map(|&m| to_byte(m)).collect()
    }

    /// Forgets the smoothing history, e.g. after a track change.
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|m| *m = 0.);
    }
}

fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0. {
        return 0;
    }
    let db = 20. * magnitude.log10();
    let scaled = 255. * (db - MIN_DB) / (MAX_DB - MIN_DB);
    scaled.clamp(0., 255.) as u8
}
