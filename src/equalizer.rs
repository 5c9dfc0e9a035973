pub const BAND_COUNT: usize = 7;

/// Center frequencies of the peaking filters, in Hz.
pub const BANDS: [u32; BAND_COUNT] = [60, 170, 350, 1000, 3500, 10000, 16000];

pub const MIN_GAIN_DB: f32 = -20.0;
pub const MAX_GAIN_DB: f32 = 20.0;

/// One gain in dB per band, indexed like [`BANDS`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GainVector([f32; BAND_COUNT]);

impl GainVector {
    pub const FLAT: GainVector = GainVector([0.0; BAND_COUNT]);

    pub fn new(gains: [f32; BAND_COUNT]) -> Self {
        Self(gains.map(|g| g.clamp(MIN_GAIN_DB, MAX_GAIN_DB)))
    }

    pub fn get(&self, band: usize) -> Option<f32> {
        self.0.get(band).copied()
    }

    /// Gain of the band centered at `freq`, if there is one.
    pub fn at_frequency(&self, freq: u32) -> Option<f32> {
        BANDS.iter().position(|&f| f == freq).map(|i| self.0[i])
    }

    pub fn set(&mut self, band: usize, gain_db: f32) {
        if let Some(g) = self.0.get_mut(band) {
            *g = gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        BANDS.iter().copied().zip(self.0.iter().copied())
    }

    pub fn as_array(&self) -> &[f32; BAND_COUNT] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    #[default]
    Custom,
    Rock,
    Pop,
    Classical,
    Jazz,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Preset::Custom,
        Preset::Rock,
        Preset::Pop,
        Preset::Classical,
        Preset::Jazz,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Preset::Custom => "Custom",
            Preset::Rock => "Rock",
            Preset::Pop => "Pop",
            Preset::Classical => "Classical",
            Preset::Jazz => "Jazz",
        }
    }

    pub fn gains(self) -> GainVector {
        match self {
            Preset::Custom | Preset::Classical => GainVector::FLAT,
            Preset::Rock => GainVector::new([8., 4., 2., 0., 6., 8., 10.]),
            Preset::Pop => GainVector::new([4., 2., 0., 2., 4., 6., 8.]),
            Preset::Jazz => GainVector::new([2., 4., 6., 4., 2., 4., 6.]),
        }
    }

    pub fn next(self) -> Self {
        let i = Self::ALL.iter().position(|&p| p == self).unwrap_or(0);
        Self::ALL[(i + 1) % Self::ALL.len()]
    }
}

/// What the equalizer panel shows: the active preset label and the live vector.
/// Not persisted between sessions.
#[derive(Debug, Clone, Default)]
pub struct EqualizerPanel {
    preset: Preset,
    gains: GainVector,
    pub selected_band: usize,
}

impl EqualizerPanel {
    pub fn preset(&self) -> Preset {
        self.preset
    }

    pub fn gains(&self) -> GainVector {
        self.gains
    }

    /// Overwrites the whole vector with the preset's values.
    pub fn select_preset(&mut self, preset: Preset) -> GainVector {
        self.preset = preset;
        self.gains = preset.gains();
        self.gains
    }

    /// Moving a single slider always turns the selection into "Custom".
    pub fn set_band(&mut self, band: usize, gain_db: f32) -> GainVector {
        self.gains.set(band, gain_db);
        self.preset = Preset::Custom;
        self.gains
    }

    pub fn select_band(&mut self, delta: isize) {
        self.selected_band =
            (self.selected_band as isize + delta).rem_euclid(BAND_COUNT as isize) as usize;
    }
}
