//! Per-gesture signal conditioning: EMA smoothing plus a baseline offset
//! captured at calibration time.

/// Exponential moving average over the raw metric. The first sample seeds
/// the average; recalibration re-seeds it and moves the baseline so drift
/// disappears instantly instead of decaying away.
#[derive(Debug, Clone)]
pub struct Conditioner {
    smoothing: f32,
    smoothed: Option<f32>,
    baseline: f32,
}

impl Conditioner {
    pub fn new(smoothing: f32) -> Self {
        Self {
            smoothing,
            smoothed: None,
            baseline: 0.0,
        }
    }

    /// Feed one raw sample, get the conditioned 0..1 activation value.
    /// A zero factor disables smoothing entirely.
    pub fn update(&mut self, raw: f32) -> f32 {
        let s = match self.smoothed {
            Some(prev) if self.smoothing > 0.0 => prev + self.smoothing * (raw - prev),
            _ => raw,
        };
        self.smoothed = Some(s);
        (s - self.baseline).clamp(0.0, 1.0)
    }

    /// Reset the average and baseline to the given raw sample.
    pub fn recalibrate(&mut self, raw: f32) {
        self.smoothed = Some(raw);
        self.baseline = raw;
    }
}
