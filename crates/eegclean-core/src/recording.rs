//! RawRecording: continuous multichannel recording held in memory

use crate::channel::ChannelType;
use crate::error::{EegError, EegResult};
use crate::info::RecordingInfo;
use ndarray::{s, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Continuous recording: a `channels x samples` matrix plus metadata.
///
/// Voltage channels are stored in volts.
#[derive(Debug, Clone)]
pub struct RawRecording {
    /// Unique identifier for this recording instance
    pub id: Uuid,
    /// Channel and acquisition metadata
    pub info: RecordingInfo,
    /// Sample matrix, one row per channel
    pub data: Array2<f64>,
}

impl RawRecording {
    /// Create a recording, validating the data shape against the metadata
    pub fn new(data: Array2<f64>, info: RecordingInfo) -> EegResult<Self> {
        if data.nrows() != info.n_channels() {
            return Err(EegError::InvalidRecording {
                reason: format!(
                    "Data has {} rows but metadata describes {} channels",
                    data.nrows(),
                    info.n_channels()
                ),
            });
        }
        for bad in &info.bads {
            info.channel_index(bad)?;
        }

        Ok(RawRecording {
            id: Uuid::new_v4(),
            info,
            data,
        })
    }

    /// Independent deep copy with a fresh identifier
    pub fn copy(&self) -> Self {
        RawRecording {
            id: Uuid::new_v4(),
            info: self.info.clone(),
            data: self.data.clone(),
        }
    }

    /// Number of channels
    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    /// Number of samples per channel
    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Sampling frequency in Hz
    pub fn sfreq(&self) -> f64 {
        self.info.sfreq
    }

    /// Recording duration in seconds
    pub fn duration(&self) -> f64 {
        self.n_samples() as f64 / self.info.sfreq
    }

    /// Time of every sample in seconds, starting at zero
    pub fn times(&self) -> Vec<f64> {
        let dt = 1.0 / self.info.sfreq;
        (0..self.n_samples()).map(|i| i as f64 * dt).collect()
    }

    /// Channel index by name
    pub fn channel_index(&self, name: &str) -> EegResult<usize> {
        self.info.channel_index(name)
    }

    /// View of one channel's samples
    pub fn channel_data(&self, index: usize) -> EegResult<ArrayView1<'_, f64>> {
        self.check_index(index)?;
        Ok(self.data.row(index))
    }

    /// Copy of the picked rows, in pick order
    pub fn get_data(&self, picks: &[usize]) -> EegResult<Array2<f64>> {
        for &idx in picks {
            self.check_index(idx)?;
        }
        Ok(self.data.select(Axis(0), picks))
    }

    /// Mark channels bad by name
    pub fn mark_bads<S: AsRef<str>>(&mut self, names: &[S]) -> EegResult<()> {
        self.info.mark_bads(names)
    }

    /// Channel indices of the given kinds
    pub fn picks_by_type(&self, kinds: &[ChannelType], exclude_bads: bool) -> Vec<usize> {
        self.info.picks_by_type(kinds, exclude_bads)
    }

    /// Keep only the picked channels, in pick order
    pub fn pick(&mut self, picks: &[usize]) -> EegResult<()> {
        let info = self.info.pick(picks)?;
        self.data = self.data.select(Axis(0), picks);
        self.info = info;
        Ok(())
    }

    /// Keep the samples in `[tmin, tmax)` seconds
    pub fn crop(&mut self, tmin: f64, tmax: f64) -> EegResult<()> {
        let duration = self.duration();
        let range_error = EegError::InvalidTimeRange { tmin, tmax, duration };
        if !(tmin >= 0.0 && tmax <= duration + 0.5 / self.info.sfreq && tmin < tmax) {
            return Err(range_error);
        }

        let start = (tmin * self.info.sfreq).round() as usize;
        let stop = ((tmax * self.info.sfreq).round() as usize).min(self.n_samples());
        if start >= stop {
            return Err(range_error);
        }

        self.data = self.data.slice(s![.., start..stop]).to_owned();
        Ok(())
    }

    /// Basic statistics for one channel
    pub fn channel_stats(&self, index: usize) -> EegResult<ChannelStats> {
        let values: Vec<f64> = self.channel_data(index)?.to_vec();
        Ok(ChannelStats::calculate(&values))
    }

    fn check_index(&self, index: usize) -> EegResult<()> {
        if index >= self.n_channels() {
            Err(EegError::InvalidChannelIndex {
                index,
                count: self.n_channels(),
            })
        } else {
            Ok(())
        }
    }
}

/// Basic statistics for a signal channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub mean: f64,
    pub rms: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub peak_to_peak: f64,
}

impl ChannelStats {
    pub fn calculate(data: &[f64]) -> Self {
        if data.is_empty() {
            return Self {
                mean: 0.0,
                rms: 0.0,
                std_dev: 0.0,
                min: 0.0,
                max: 0.0,
                peak_to_peak: 0.0,
            };
        }

        let n = data.len() as f64;
        let mean = data.iter().sum::<f64>() / n;
        let rms = (data.iter().map(|x| x * x).sum::<f64>() / n).sqrt();
        let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;

        let min = data.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = data.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

        Self {
            mean,
            rms,
            std_dev: variance.sqrt(),
            min,
            max,
            peak_to_peak: max - min,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn recording() -> RawRecording {
        let info = RecordingInfo::from_labels(100.0, &["Fp1", "Cz", "EOG 061"]).unwrap();
        let data = Array2::from_shape_fn((3, 500), |(ch, i)| (ch * 1000 + i) as f64);
        RawRecording::new(data, info).unwrap()
    }

    #[test]
    fn test_recording_creation() {
        let raw = recording();
        assert_eq!(raw.n_channels(), 3);
        assert_eq!(raw.n_samples(), 500);
        assert!((raw.duration() - 5.0).abs() < 1e-12);
        assert_eq!(raw.times().len(), 500);
        assert!((raw.times()[100] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let info = RecordingInfo::from_labels(100.0, &["Fp1", "Cz"]).unwrap();
        let result = RawRecording::new(Array2::zeros((3, 10)), info);
        assert!(matches!(result, Err(EegError::InvalidRecording { .. })));
    }

    #[test]
    fn test_copy_is_independent() {
        let raw = recording();
        let mut copy = raw.copy();
        copy.data[[0, 0]] = -1.0;
        copy.mark_bads(&["Cz"]).unwrap();
        assert_eq!(raw.data[[0, 0]], 0.0);
        assert!(!raw.info.is_bad("Cz"));
        assert_ne!(raw.id, copy.id);
    }

    #[test]
    fn test_channel_access() {
        let raw = recording();
        let cz = raw.channel_index("Cz").unwrap();
        assert_eq!(raw.channel_data(cz).unwrap()[3], 1003.0);
        assert!(raw.channel_data(3).is_err());

        let sub = raw.get_data(&[2, 0]).unwrap();
        assert_eq!(sub.shape(), &[2, 500]);
        assert_eq!(sub[[0, 0]], 2000.0);
    }

    #[test]
    fn test_pick() {
        let mut raw = recording();
        raw.mark_bads(&["Fp1"]).unwrap();
        raw.pick(&[1, 2]).unwrap();
        assert_eq!(raw.n_channels(), 2);
        assert_eq!(raw.info.ch_names(), vec!["Cz".to_string(), "EOG 061".to_string()]);
        assert!(raw.info.bads.is_empty());
        assert_eq!(raw.data[[0, 0]], 1000.0);
    }

    #[test]
    fn test_crop() {
        let mut raw = recording();
        raw.crop(1.0, 2.5).unwrap();
        assert_eq!(raw.n_samples(), 150);
        assert_eq!(raw.data[[0, 0]], 100.0);

        assert!(raw.crop(1.0, 1.0).is_err());
        assert!(raw.crop(-0.1, 1.0).is_err());
        assert!(raw.crop(0.0, 10.0).is_err());
    }

    #[test]
    fn test_channel_stats() {
        let stats = ChannelStats::calculate(&[1.0, -1.0, 1.0, -1.0]);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.rms, 1.0);
        assert_eq!(stats.std_dev, 1.0);
        assert_eq!(stats.peak_to_peak, 2.0);

        let raw = recording();
        let stats = raw.channel_stats(0).unwrap();
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 499.0);
    }
}
