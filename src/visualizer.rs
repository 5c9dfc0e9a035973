pub const BAR_COUNT: usize = 30;
const BAR_SCALE: f32 = 0.8;

pub type Bars = [f32; BAR_COUNT];

/// Picks one bin per bar (`floor(i * bins / 30)`) and scales it down.
/// Fewer bins than bars just repeats bins; no bins gives silence.
pub fn downsample(bins: &[u8]) -> Bars {
    let mut bars = [0.; BAR_COUNT];
    if bins.is_empty() {
        return bars;
    }
    for (i, bar) in bars.iter_mut().enumerate() {
        let bin = i * bins.len() / BAR_COUNT;
        *bar = f32::from(bins[bin]) * BAR_SCALE;
    }
    bars
}

/// Bar values as heights for a chart scaled to `0..=255`.
pub fn heights(bars: &Bars) -> [u64; BAR_COUNT] {
    bars.map(|b| b.round().max(0.) as u64)
}
