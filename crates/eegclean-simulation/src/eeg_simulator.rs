//! Synthetic EEG recordings with eyeblink artifacts

use crate::blink_patterns::{BlinkSchedule, BlinkShape};
use eegclean_core::{layout, ChannelType, EegError, EegResult, RawRecording, RecordingInfo};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

/// 32-channel 10-10 montage plus one EOG reference
pub const DEFAULT_MONTAGE: &[&str] = &[
    "Fp1", "Fp2", "AF3", "AF4", "F7", "F3", "Fz", "F4", "F8", "FC5", "FC1", "FC2", "FC6", "T7", "C3",
    "Cz", "C4", "T8", "CP5", "CP1", "CP2", "CP6", "P7", "P3", "Pz", "P4", "P8", "PO3", "PO4", "O1",
    "Oz", "O2", "EOG 061",
];

/// Layout position the blink field is centred on, just above the nasion
const EYE_POSITION: (f64, f64) = (0.0, 0.95);

/// Configuration for EEG simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EEGConfig {
    /// Sampling rate in Hz
    pub sampling_rate: f64,
    /// Channel labels; types are inferred from the labels
    pub channel_labels: Vec<String>,
    /// Background activity
    pub background: BackgroundConfig,
    /// Eyeblinks
    pub blinks: BlinkConfig,
    /// Power line interference (50/60Hz)
    pub powerline_freq: Option<f64>,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

/// Ongoing brain activity and sensor noise, amplitudes in volts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Standard deviation of the per-channel 1/f-like background
    pub drift_std: f64,
    /// Pole of the AR(1) process shaping the background
    pub drift_pole: f64,
    /// White sensor noise standard deviation
    pub sensor_noise_std: f64,
    /// Peak amplitude of the posterior alpha rhythm
    pub alpha_amplitude: f64,
    pub alpha_freq: f64,
    /// Amplitude of the power line component
    pub powerline_amplitude: f64,
}

/// Eyeblink generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlinkConfig {
    pub schedule: BlinkSchedule,
    pub shape: BlinkShape,
    /// Peak amplitude on the EOG channel (V)
    pub amplitude: f64,
    /// Spatial spread of the blink field in layout units
    pub spread: f64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            drift_std: 6e-6,
            drift_pole: 0.95,
            sensor_noise_std: 2e-6,
            alpha_amplitude: 8e-6,
            alpha_freq: 10.0,
            powerline_amplitude: 3e-6,
        }
    }
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            schedule: BlinkSchedule::default(),
            shape: BlinkShape::default(),
            amplitude: 150e-6,
            spread: 0.35,
        }
    }
}

impl Default for EEGConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 250.0,
            channel_labels: DEFAULT_MONTAGE.iter().map(|s| s.to_string()).collect(),
            background: BackgroundConfig::default(),
            blinks: BlinkConfig::default(),
            powerline_freq: Some(60.0),
            seed: None,
        }
    }
}

/// A simulated recording with its ground truth
#[derive(Debug, Clone)]
pub struct SimulatedSession {
    pub raw: RawRecording,
    /// Sample index of every blink peak
    pub blink_samples: Vec<usize>,
    /// Blink gain per channel, 1.0 on EOG channels
    pub blink_gains: Vec<f64>,
}

/// EEG recording simulator
pub struct EEGSimulator {
    config: EEGConfig,
    rng: rand::rngs::StdRng,
}

impl EEGSimulator {
    /// Create new EEG simulator with configuration
    pub fn new(config: EEGConfig) -> EegResult<Self> {
        Self::validate(&config)?;

        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let rng = rand::rngs::StdRng::seed_from_u64(seed);
        Ok(EEGSimulator { config, rng })
    }

    fn validate(config: &EEGConfig) -> EegResult<()> {
        RecordingInfo::validate_sampling_rate(config.sampling_rate)?;
        if config.channel_labels.is_empty() {
            return Err(EegError::ConfigurationError {
                message: "Simulation needs at least one channel".to_string(),
            });
        }
        if !(0.0..1.0).contains(&config.background.drift_pole) {
            return Err(EegError::ConfigurationError {
                message: format!("Background pole must be in [0, 1), got {}", config.background.drift_pole),
            });
        }
        if !(config.blinks.spread > 0.0) {
            return Err(EegError::ConfigurationError {
                message: "Blink spread must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Get current configuration
    pub fn config(&self) -> &EEGConfig {
        &self.config
    }

    /// Blink gain per channel: 1 on EOG channels, a Gaussian falloff with
    /// distance from the eyes on EEG channels with a known position, 0 otherwise
    pub fn blink_gains(&self, info: &RecordingInfo) -> Vec<f64> {
        let spread = self.config.blinks.spread;
        info.channels
            .iter()
            .map(|ch| match ch.kind {
                ChannelType::Eog => 1.0,
                ChannelType::Eeg => layout::lookup(&ch.name)
                    .map(|(x, y)| {
                        let d2 = (x - EYE_POSITION.0).powi(2) + (y - EYE_POSITION.1).powi(2);
                        (-d2 / (2.0 * spread * spread)).exp()
                    })
                    .unwrap_or(0.0),
                _ => 0.0,
            })
            .collect()
    }

    // Alpha is strongest over occipital sites and fades towards the front
    fn alpha_gains(&self, info: &RecordingInfo) -> Vec<f64> {
        info.channels
            .iter()
            .map(|ch| match ch.kind {
                ChannelType::Eeg => layout::lookup(&ch.name)
                    .map(|(_, y)| (0.5 - y).clamp(0.0, 1.3) / 1.3)
                    .unwrap_or(0.2),
                _ => 0.0,
            })
            .collect()
    }

    /// Generate `duration` seconds of data
    pub fn generate(&mut self, duration: f64) -> EegResult<SimulatedSession> {
        let sfreq = self.config.sampling_rate;
        let n_samples = (duration * sfreq).round() as usize;
        if n_samples == 0 {
            return Err(EegError::ConfigurationError {
                message: format!("Duration {} s yields no samples", duration),
            });
        }

        let info = RecordingInfo::from_labels(sfreq, &self.config.channel_labels)?;
        let n_channels = info.n_channels();
        let bg = self.config.background.clone();
        let blinks = self.config.blinks.clone();

        let innovation_std = bg.drift_std * (1.0 - bg.drift_pole * bg.drift_pole).sqrt();
        let innovation = normal(innovation_std)?;
        let sensor = normal(bg.sensor_noise_std)?;

        let mut data = Array2::zeros((n_channels, n_samples));

        // Independent background per channel
        for mut row in data.rows_mut() {
            let mut state = 0.0;
            for v in row.iter_mut() {
                state = bg.drift_pole * state + innovation.sample(&mut self.rng);
                *v = state + sensor.sample(&mut self.rng);
            }
        }

        // One shared alpha source with slow amplitude modulation
        let alpha_gains = self.alpha_gains(&info);
        let phase: f64 = self.rng.gen_range(0.0..2.0 * PI);
        for i in 0..n_samples {
            let t = i as f64 / sfreq;
            let envelope = 0.75 + 0.25 * (2.0 * PI * 0.1 * t).sin();
            let alpha = bg.alpha_amplitude * envelope * (2.0 * PI * bg.alpha_freq * t + phase).sin();
            for (ch, &g) in alpha_gains.iter().enumerate() {
                data[[ch, i]] += g * alpha;
            }
        }

        if let Some(freq) = self.config.powerline_freq {
            for i in 0..n_samples {
                let line = bg.powerline_amplitude * (2.0 * PI * freq * i as f64 / sfreq).sin();
                for ch in 0..n_channels {
                    if info.channels[ch].kind.is_voltage() {
                        data[[ch, i]] += line;
                    }
                }
            }
        }

        // Blinks: one spatially fixed source
        let blink_gains = self.blink_gains(&info);
        let support = blinks.shape.support();
        let times = blinks.schedule.times(duration, support, &mut self.rng);
        let half = (support * sfreq).ceil() as usize;
        let mut blink_samples = Vec::with_capacity(times.len());

        for &t in &times {
            let center = (t * sfreq).round() as usize;
            blink_samples.push(center);
            let start = center.saturating_sub(half);
            let stop = (center + half + 1).min(n_samples);
            for i in start..stop {
                let dt = (i as f64 - center as f64) / sfreq;
                let value = blinks.amplitude * blinks.shape.value_at(dt);
                for (ch, &g) in blink_gains.iter().enumerate() {
                    if g > 0.0 {
                        data[[ch, i]] += g * value;
                    }
                }
            }
        }

        debug!(
            "Simulated {} channels x {} samples with {} blinks",
            n_channels,
            n_samples,
            blink_samples.len()
        );

        Ok(SimulatedSession {
            raw: RawRecording::new(data, info)?,
            blink_samples,
            blink_gains,
        })
    }
}

fn normal(std: f64) -> EegResult<Normal<f64>> {
    Normal::new(0.0, std).map_err(|e| EegError::ConfigurationError {
        message: format!("Failed to create normal distribution: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64) -> EEGConfig {
        EEGConfig {
            seed: Some(seed),
            ..EEGConfig::default()
        }
    }

    #[test]
    fn test_eeg_simulator_basic() {
        let mut simulator = EEGSimulator::new(seeded(1)).unwrap();
        let session = simulator.generate(10.0).unwrap();

        assert_eq!(session.raw.n_channels(), 33);
        assert_eq!(session.raw.n_samples(), 2500);
        assert_eq!(session.raw.sfreq(), 250.0);
        assert_eq!(session.raw.picks_by_type(&[ChannelType::Eog], false), vec![32]);
        assert!(!session.blink_samples.is_empty());
    }

    #[test]
    fn test_same_seed_same_data() {
        let a = EEGSimulator::new(seeded(42)).unwrap().generate(4.0).unwrap();
        let b = EEGSimulator::new(seeded(42)).unwrap().generate(4.0).unwrap();
        assert_eq!(a.raw.data, b.raw.data);
        assert_eq!(a.blink_samples, b.blink_samples);
    }

    #[test]
    fn test_blink_gains_fall_off_from_the_eyes() {
        let simulator = EEGSimulator::new(seeded(3)).unwrap();
        let info = RecordingInfo::from_labels(250.0, DEFAULT_MONTAGE).unwrap();
        let gains = simulator.blink_gains(&info);
        let gain = |name: &str| gains[info.channel_index(name).unwrap()];

        assert_eq!(gain("EOG 061"), 1.0);
        assert!(gain("Fp1") > 0.5);
        assert!(gain("Fp1") > gain("Fz"));
        assert!(gain("Fz") > gain("Cz"));
        assert!(gain("Oz") < 1e-3);
    }

    #[test]
    fn test_blinks_dominate_frontal_channels() {
        let mut config = seeded(5);
        config.powerline_freq = None;
        let session = EEGSimulator::new(config).unwrap().generate(30.0).unwrap();
        let raw = &session.raw;

        let fp1 = raw.channel_stats(raw.channel_index("Fp1").unwrap()).unwrap();
        let oz = raw.channel_stats(raw.channel_index("Oz").unwrap()).unwrap();
        assert!(fp1.peak_to_peak > 1.5 * oz.peak_to_peak);
        // Stays under the usual 200 uV rejection limit
        assert!(fp1.peak_to_peak < 2e-4);

        let eog = raw.channel_index("EOG 061").unwrap();
        for &s in &session.blink_samples {
            assert!(raw.data[[eog, s]] > 100e-6);
        }
    }

    #[test]
    fn test_invalid_config() {
        let mut config = EEGConfig::default();
        config.sampling_rate = 0.0;
        assert!(EEGSimulator::new(config).is_err());

        let mut config = EEGConfig::default();
        config.background.drift_pole = 1.0;
        assert!(EEGSimulator::new(config).is_err());

        let mut simulator = EEGSimulator::new(seeded(0)).unwrap();
        assert!(simulator.generate(0.0).is_err());
    }
}
