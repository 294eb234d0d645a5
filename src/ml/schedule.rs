use serde::{Deserialize, Serialize};

/// Learning rate as a function of the global step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum LearningRateSchedule {
    Constant { lr: f64 },
    /// `initial · rate^(samples_seen / decay_samples)`, where
    /// `samples_seen = step · batch_size`. With `staircase` the exponent is
    /// floored, so the rate drops in discrete steps.
    ExponentialDecay {
        initial:       f64,
        decay_samples: usize,
        decay_rate:    f64,
        staircase:     bool,
    },
}

impl LearningRateSchedule {
    pub fn learning_rate(&self, step: usize, batch_size: usize) -> f64 {
        match *self {
            LearningRateSchedule::Constant { lr } => lr,
            LearningRateSchedule::ExponentialDecay { initial, decay_samples, decay_rate, staircase } => {
                if decay_samples == 0 {
                    return initial;
                }
                let progress = (step * batch_size) as f64 / decay_samples as f64;
                let exponent = if staircase { progress.floor() } else { progress };
                initial * decay_rate.powf(exponent)
            }
        }
    }
}
