//! Eyeblink waveforms and timing for simulated recordings

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Shape of a single blink, unit peak
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BlinkShape {
    /// Symmetric bump with standard deviation `width` seconds
    Gaussian { width: f64 },
    /// Faster lid closure than reopening
    Asymmetric { rise: f64, fall: f64 },
}

/// When blinks happen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BlinkSchedule {
    /// Fixed interval with uniform jitter of up to `jitter` seconds either way
    Regular { interval: f64, jitter: f64 },
    /// Exponential intervals with mean `1 / rate`, never closer than `refractory`
    Random { rate: f64, refractory: f64 },
}

impl BlinkShape {
    /// Value at `dt` seconds from the blink peak
    pub fn value_at(&self, dt: f64) -> f64 {
        match *self {
            BlinkShape::Gaussian { width } => {
                let z = dt / width;
                (-0.5 * z * z).exp()
            }
            BlinkShape::Asymmetric { rise, fall } => {
                let width = if dt < 0.0 { rise } else { fall };
                let z = dt / width;
                (-0.5 * z * z).exp()
            }
        }
    }

    /// Half-width beyond which the waveform is negligible (s)
    pub fn support(&self) -> f64 {
        match *self {
            BlinkShape::Gaussian { width } => 4.0 * width,
            BlinkShape::Asymmetric { rise, fall } => 4.0 * rise.max(fall),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BlinkShape::Gaussian { .. } => "Symmetric blink",
            BlinkShape::Asymmetric { .. } => "Fast closure, slow reopening",
        }
    }
}

impl Default for BlinkShape {
    fn default() -> Self {
        BlinkShape::Asymmetric { rise: 0.04, fall: 0.08 }
    }
}

impl BlinkSchedule {
    /// Blink peak times in `(margin, duration - margin)`
    pub fn times<R: Rng>(&self, duration: f64, margin: f64, rng: &mut R) -> Vec<f64> {
        let mut times = Vec::new();
        let end = duration - margin;
        match *self {
            BlinkSchedule::Regular { interval, jitter } => {
                if !(interval > 0.0) {
                    return times;
                }
                let mut t = margin + interval / 2.0;
                while t < end {
                    let offset = if jitter > 0.0 { rng.gen_range(-jitter..jitter) } else { 0.0 };
                    let blink = t + offset;
                    if blink > margin && blink < end {
                        times.push(blink);
                    }
                    t += interval;
                }
            }
            BlinkSchedule::Random { rate, refractory } => {
                if !(rate > 0.0) {
                    return times;
                }
                let mut t = margin;
                loop {
                    let u: f64 = rng.gen_range(f64::EPSILON..1.0);
                    t += (-u.ln() / rate).max(refractory);
                    if t >= end {
                        break;
                    }
                    times.push(t);
                }
            }
        }
        times
    }

    pub fn description(&self) -> &'static str {
        match self {
            BlinkSchedule::Regular { .. } => "Regular blinking",
            BlinkSchedule::Random { .. } => "Spontaneous blinking",
        }
    }

    /// Common schedules
    pub fn presets() -> Vec<(&'static str, BlinkSchedule)> {
        vec![
            ("Relaxed", BlinkSchedule::Random { rate: 0.25, refractory: 1.0 }),
            ("Reading", BlinkSchedule::Random { rate: 0.1, refractory: 2.0 }),
            ("Cued every 3 s", BlinkSchedule::Regular { interval: 3.0, jitter: 0.3 }),
            ("Fatigued", BlinkSchedule::Random { rate: 0.5, refractory: 0.8 }),
        ]
    }
}

impl Default for BlinkSchedule {
    fn default() -> Self {
        BlinkSchedule::Regular { interval: 3.0, jitter: 0.5 }
    }
}
