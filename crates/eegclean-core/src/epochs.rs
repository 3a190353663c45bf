//! Epochs and evoked responses cut from a continuous recording

use crate::channel::ChannelType;
use crate::error::{EegError, EegResult};
use crate::info::RecordingInfo;
use crate::recording::RawRecording;
use ndarray::{s, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Event marker: sample index into the recording and an integer id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub sample: usize,
    pub id: i32,
}

impl Event {
    pub fn new(sample: usize, id: i32) -> Self {
        Self { sample, id }
    }
}

/// Fixed-length windows around events, `epochs x channels x times`
#[derive(Debug, Clone)]
pub struct Epochs {
    pub info: RecordingInfo,
    pub data: Array3<f64>,
    /// Events whose windows were kept
    pub events: Vec<Event>,
    pub tmin: f64,
    pub tmax: f64,
    /// Events dropped by bounds or rejection
    pub n_dropped: usize,
}

impl Epochs {
    /// Cut windows of `[tmin, tmax]` seconds around each event.
    ///
    /// Windows running past either end of the recording are dropped. With
    /// `baseline = Some((a, b))` the mean over `[a, b]` is removed per channel.
    /// With `reject = Some(ptp)` any epoch whose peak-to-peak on an EEG channel
    /// exceeds `ptp` is dropped.
    pub fn from_raw(
        raw: &RawRecording,
        events: &[Event],
        tmin: f64,
        tmax: f64,
        picks: Option<&[usize]>,
        baseline: Option<(f64, f64)>,
        reject: Option<f64>,
    ) -> EegResult<Self> {
        if !(tmin < tmax) {
            return Err(EegError::InvalidTimeRange {
                tmin,
                tmax,
                duration: raw.duration(),
            });
        }

        let all: Vec<usize> = (0..raw.n_channels()).collect();
        let picks = picks.unwrap_or(&all);
        let info = raw.info.pick(picks)?;
        let sfreq = raw.sfreq();

        let start_offset = (tmin * sfreq).round() as i64;
        let stop_offset = (tmax * sfreq).round() as i64;
        let n_times = (stop_offset - start_offset + 1) as usize;

        let baseline_range = match baseline {
            Some((b0, b1)) => {
                let i0 = ((b0 * sfreq).round() as i64 - start_offset).max(0);
                let i1 = ((b1 * sfreq).round() as i64 - start_offset).min(n_times as i64 - 1);
                if b0 > b1 || i0 > i1 {
                    return Err(EegError::InvalidTimeRange { tmin: b0, tmax: b1, duration: tmax - tmin });
                }
                Some((i0 as usize, i1 as usize + 1))
            }
            None => None,
        };

        let eeg_rows: Vec<usize> = info
            .channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ChannelType::Eeg)
            .map(|(i, _)| i)
            .collect();

        let mut kept_events = Vec::new();
        let mut windows: Vec<Array2<f64>> = Vec::new();
        let mut n_dropped = 0;

        for event in events {
            let first = event.sample as i64 + start_offset;
            let last = event.sample as i64 + stop_offset;
            if first < 0 || last >= raw.n_samples() as i64 {
                n_dropped += 1;
                continue;
            }

            let mut window = raw
                .data
                .select(Axis(0), picks)
                .slice(s![.., first as usize..=last as usize])
                .to_owned();

            if let Some((b0, b1)) = baseline_range {
                for mut row in window.rows_mut() {
                    let mean = row.slice(s![b0..b1]).mean().unwrap_or(0.0);
                    row.mapv_inplace(|v| v - mean);
                }
            }

            if let Some(threshold) = reject {
                let too_large = eeg_rows.iter().any(|&r| {
                    let row = window.row(r);
                    let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
                    let min = row.fold(f64::INFINITY, |a, &b| a.min(b));
                    max - min > threshold
                });
                if too_large {
                    n_dropped += 1;
                    continue;
                }
            }

            kept_events.push(*event);
            windows.push(window);
        }

        let mut data = Array3::zeros((windows.len(), picks.len(), n_times));
        for (i, window) in windows.iter().enumerate() {
            data.slice_mut(s![i, .., ..]).assign(window);
        }

        debug!(
            kept = kept_events.len(),
            dropped = n_dropped,
            "Created epochs [{:.3}, {:.3}] s",
            tmin,
            tmax
        );

        Ok(Epochs {
            info,
            data,
            events: kept_events,
            tmin: start_offset as f64 / sfreq,
            tmax: stop_offset as f64 / sfreq,
            n_dropped,
        })
    }

    pub fn n_epochs(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn n_channels(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn n_times(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn is_empty(&self) -> bool {
        self.n_epochs() == 0
    }

    /// Time axis of one epoch in seconds
    pub fn times(&self) -> Vec<f64> {
        (0..self.n_times())
            .map(|i| self.tmin + i as f64 / self.info.sfreq)
            .collect()
    }

    /// Average over epochs
    pub fn average(&self) -> EegResult<Evoked> {
        let data = self.data.mean_axis(Axis(0)).ok_or_else(|| EegError::InvalidRecording {
            reason: "Cannot average zero epochs".to_string(),
        })?;
        Ok(Evoked {
            info: self.info.clone(),
            data,
            tmin: self.tmin,
            nave: self.n_epochs(),
        })
    }

    /// Epochs laid end to end: `channels x (epochs * times)`
    pub fn concatenated(&self) -> Array2<f64> {
        let (n_epochs, n_channels, n_times) = self.data.dim();
        let mut out = Array2::zeros((n_channels, n_epochs * n_times));
        for e in 0..n_epochs {
            out.slice_mut(s![.., e * n_times..(e + 1) * n_times])
                .assign(&self.data.slice(s![e, .., ..]));
        }
        out
    }
}

/// Averaged response, `channels x times`
#[derive(Debug, Clone)]
pub struct Evoked {
    pub info: RecordingInfo,
    pub data: Array2<f64>,
    pub tmin: f64,
    /// Number of averaged epochs
    pub nave: usize,
}

impl Evoked {
    pub fn times(&self) -> Vec<f64> {
        (0..self.data.ncols())
            .map(|i| self.tmin + i as f64 / self.info.sfreq)
            .collect()
    }

    /// Channel index and time of the largest absolute value across channels
    pub fn peak(&self) -> Option<(usize, f64)> {
        let times = self.times();
        self.data
            .indexed_iter()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|((ch, t), _)| (ch, times[t]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_recording() -> RawRecording {
        let info = RecordingInfo::from_labels(100.0, &["Fp1", "Cz", "EOG 061"]).unwrap();
        let data = Array2::from_shape_fn((3, 1000), |(ch, i)| (ch + 1) as f64 * i as f64);
        RawRecording::new(data, info).unwrap()
    }

    #[test]
    fn test_epoch_shape_and_bounds() {
        let raw = ramp_recording();
        let events = vec![Event::new(20, 998), Event::new(500, 998), Event::new(990, 998)];
        let epochs = Epochs::from_raw(&raw, &events, -0.5, 0.5, None, None, None).unwrap();

        assert_eq!(epochs.n_epochs(), 1);
        assert_eq!(epochs.n_dropped, 2);
        assert_eq!(epochs.n_times(), 101);
        assert_eq!(epochs.events[0].sample, 500);
        assert_eq!(epochs.data[[0, 0, 0]], 450.0);
        assert!((epochs.times()[50]).abs() < 1e-12);
    }

    #[test]
    fn test_baseline_and_picks() {
        let raw = ramp_recording();
        let events = vec![Event::new(500, 1)];
        let epochs =
            Epochs::from_raw(&raw, &events, -0.2, 0.2, Some(&[1]), Some((-0.2, 0.0)), None).unwrap();
        assert_eq!(epochs.n_channels(), 1);
        // Baseline of a ramp over [-0.2, 0] is its value at -0.1 s
        assert!((epochs.data[[0, 0, 10]]).abs() < 1e-9);
    }

    #[test]
    fn test_reject_uses_eeg_channels_only() {
        let raw = ramp_recording();
        let events = vec![Event::new(500, 1)];
        // Fp1 spans 100 units, Cz spans 200 and EOG spans 300
        let kept = Epochs::from_raw(&raw, &events, -0.5, 0.5, None, None, Some(250.0)).unwrap();
        assert_eq!(kept.n_epochs(), 1);
        let dropped = Epochs::from_raw(&raw, &events, -0.5, 0.5, None, None, Some(150.0)).unwrap();
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_average_and_concatenate() {
        let raw = ramp_recording();
        let events = vec![Event::new(200, 1), Event::new(400, 1)];
        let epochs = Epochs::from_raw(&raw, &events, 0.0, 0.09, None, None, None).unwrap();

        let evoked = epochs.average().unwrap();
        assert_eq!(evoked.nave, 2);
        assert_eq!(evoked.data[[0, 0]], 300.0);

        let flat = epochs.concatenated();
        assert_eq!(flat.shape(), &[3, 20]);
        assert_eq!(flat[[0, 10]], 400.0);
    }

    #[test]
    fn test_average_empty_fails() {
        let raw = ramp_recording();
        let epochs = Epochs::from_raw(&raw, &[], -0.1, 0.1, None, None, None).unwrap();
        assert!(epochs.average().is_err());
        assert!(Epochs::from_raw(&raw, &[], 0.1, -0.1, None, None, None).is_err());
    }
}
