//! Running activation statistics for clip-bound initialization.

use ndarray::ArrayD;

/// Momentum of the exponential moving averages.
const MOMENTUM: f32 = 0.9;

/// Tensor-wise statistics gathered while a module collects data.
///
/// Before a quantized activation is started it observes its inputs and
/// tracks the extrema plus EMA mean/variance; an external controller
/// reads these to initialize the clip bounds.
#[derive(Clone, Debug)]
pub struct RunningStats {
    max: f32,
    min: f32,
    running_mean: f32,
    running_var: f32,
    batches: usize,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self {
            max: 0.0,
            min: 0.0,
            running_mean: 0.0,
            running_var: 1.0,
            batches: 0,
        }
    }
}

impl RunningStats {
    /// Fresh statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one batch of activations.
    pub fn update(&mut self, x: &ArrayD<f32>) {
        if x.is_empty() {
            return;
        }
        let batch_max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let batch_min = x.iter().copied().fold(f32::INFINITY, f32::min);
        let mean = x.mean().unwrap_or(0.0);
        let var = x.mapv(|v| (v - mean) * (v - mean)).mean().unwrap_or(0.0);

        self.max = self.max.max(batch_max);
        self.min = self.min.min(batch_min);
        self.running_mean = MOMENTUM * self.running_mean + (1.0 - MOMENTUM) * mean;
        self.running_var = MOMENTUM * self.running_var + (1.0 - MOMENTUM) * var;
        self.batches += 1;
    }

    /// Largest value ever observed.
    pub fn max(&self) -> f32 {
        self.max
    }

    /// Smallest value ever observed.
    pub fn min(&self) -> f32 {
        self.min
    }

    /// EMA of the batch means.
    pub fn mean(&self) -> f32 {
        self.running_mean
    }

    /// EMA of the batch variances.
    pub fn var(&self) -> f32 {
        self.running_var
    }

    /// EMA standard deviation.
    pub fn std(&self) -> f32 {
        self.running_var.max(0.0).sqrt()
    }

    /// Number of batches observed so far.
    pub fn batches(&self) -> usize {
        self.batches
    }
}
