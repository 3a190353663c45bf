//! Recording metadata

use crate::channel::{ChannelInfo, ChannelType};
use crate::error::{EegError, EegResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// A filter that has been applied to some channels of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRecord {
    /// Highpass edge in Hz, if any
    pub l_freq: Option<f64>,
    /// Lowpass edge in Hz, if any
    pub h_freq: Option<f64>,
    /// Number of taps of the FIR kernel
    pub taps: usize,
    /// Channels the filter was applied to
    pub channels: Vec<String>,
}

/// Metadata describing a multichannel recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingInfo {
    /// Sampling frequency in Hz
    pub sfreq: f64,
    /// Ordered channel descriptions
    pub channels: Vec<ChannelInfo>,
    /// Names of channels marked bad
    pub bads: BTreeSet<String>,
    /// Current highpass edge in Hz (0 when unfiltered)
    pub highpass: f64,
    /// Current lowpass edge in Hz (Nyquist when unfiltered)
    pub lowpass: f64,
    /// Filters applied so far, oldest first
    pub filter_history: Vec<FilterRecord>,
    /// Measurement start
    pub meas_date: Option<NaiveDateTime>,
    /// Subject identification
    pub subject_id: String,
    /// Recording identification
    pub recording_id: String,
}

impl RecordingInfo {
    /// Create validated metadata
    pub fn new(sfreq: f64, channels: Vec<ChannelInfo>) -> EegResult<Self> {
        Self::validate_sampling_rate(sfreq)?;

        let mut seen = HashSet::with_capacity(channels.len());
        for ch in &channels {
            if !seen.insert(ch.name.as_str()) {
                return Err(EegError::InvalidRecording {
                    reason: format!("Duplicate channel name '{}'", ch.name),
                });
            }
        }

        Ok(RecordingInfo {
            sfreq,
            channels,
            bads: BTreeSet::new(),
            highpass: 0.0,
            lowpass: sfreq / 2.0,
            filter_history: Vec::new(),
            meas_date: None,
            subject_id: String::new(),
            recording_id: String::new(),
        })
    }

    /// Create metadata from bare labels, classifying each label
    pub fn from_labels<S: AsRef<str>>(sfreq: f64, labels: &[S]) -> EegResult<Self> {
        let channels = labels
            .iter()
            .map(|l| ChannelInfo::from_label(l.as_ref()))
            .collect();
        Self::new(sfreq, channels)
    }

    /// Validate a sampling frequency
    pub fn validate_sampling_rate(sfreq: f64) -> EegResult<()> {
        if !sfreq.is_finite() || sfreq <= 0.0 {
            Err(EegError::InvalidRecording {
                reason: format!("Sampling frequency must be positive, got {}", sfreq),
            })
        } else {
            Ok(())
        }
    }

    /// Number of channels
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// Nyquist frequency
    pub fn nyquist(&self) -> f64 {
        self.sfreq / 2.0
    }

    /// Channel names in order
    pub fn ch_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    /// Index of a channel by exact name
    pub fn channel_index(&self, name: &str) -> EegResult<usize> {
        self.channels
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| EegError::ChannelNotFound { name: name.to_string() })
    }

    /// Whether a channel is marked bad
    pub fn is_bad(&self, name: &str) -> bool {
        self.bads.contains(name)
    }

    /// Mark channels bad; every name must exist
    pub fn mark_bads<S: AsRef<str>>(&mut self, names: &[S]) -> EegResult<()> {
        for name in names {
            self.channel_index(name.as_ref())?;
        }
        for name in names {
            self.bads.insert(name.as_ref().to_string());
        }
        Ok(())
    }

    /// Indices of channels of the given kinds
    pub fn picks_by_type(&self, kinds: &[ChannelType], exclude_bads: bool) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| kinds.contains(&c.kind))
            .filter(|(_, c)| !(exclude_bads && self.bads.contains(&c.name)))
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices for a list of channel names, in the given order
    pub fn picks_by_name<S: AsRef<str>>(&self, names: &[S]) -> EegResult<Vec<usize>> {
        names.iter().map(|n| self.channel_index(n.as_ref())).collect()
    }

    /// Metadata restricted to the given channel indices.
    ///
    /// Bad channels that are not kept are dropped from the bad set.
    pub fn pick(&self, picks: &[usize]) -> EegResult<Self> {
        let mut channels = Vec::with_capacity(picks.len());
        for &idx in picks {
            let ch = self.channels.get(idx).ok_or(EegError::InvalidChannelIndex {
                index: idx,
                count: self.channels.len(),
            })?;
            channels.push(ch.clone());
        }

        let mut info = RecordingInfo::new(self.sfreq, channels)?;
        info.bads = self
            .bads
            .iter()
            .filter(|b| info.channels.iter().any(|c| &c.name == *b))
            .cloned()
            .collect();
        info.highpass = self.highpass;
        info.lowpass = self.lowpass;
        info.filter_history = self.filter_history.clone();
        info.meas_date = self.meas_date;
        info.subject_id = self.subject_id.clone();
        info.recording_id = self.recording_id.clone();
        Ok(info)
    }

    /// Count of channels per kind, skipping kinds that are absent
    pub fn type_counts(&self) -> Vec<(ChannelType, usize)> {
        ChannelType::ALL
            .iter()
            .map(|&kind| (kind, self.channels.iter().filter(|c| c.kind == kind).count()))
            .filter(|(_, n)| *n > 0)
            .collect()
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        let counts: Vec<String> = self
            .type_counts()
            .iter()
            .map(|(k, n)| format!("{} {}", n, k))
            .collect();
        format!(
            "{} channels ({}) @ {:.1} Hz, bads: [{}], passband {:.2}-{:.2} Hz",
            self.n_channels(),
            counts.join(", "),
            self.sfreq,
            self.bads.iter().cloned().collect::<Vec<_>>().join(", "),
            self.highpass,
            self.lowpass
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> RecordingInfo {
        RecordingInfo::from_labels(250.0, &["Fp1", "Fp2", "Cz", "EOG 061", "STI 014"]).unwrap()
    }

    #[test]
    fn test_info_creation() {
        let info = info();
        assert_eq!(info.n_channels(), 5);
        assert_eq!(info.lowpass, 125.0);
        assert_eq!(info.highpass, 0.0);
        assert_eq!(info.channels[3].kind, ChannelType::Eog);
    }

    #[test]
    fn test_invalid_sampling_rate() {
        assert!(RecordingInfo::from_labels(0.0, &["Cz"]).is_err());
        assert!(RecordingInfo::from_labels(f64::NAN, &["Cz"]).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = RecordingInfo::from_labels(100.0, &["Cz", "Cz"]);
        assert!(matches!(result, Err(EegError::InvalidRecording { .. })));
    }

    #[test]
    fn test_mark_bads() {
        let mut info = info();
        info.mark_bads(&["Fp2"]).unwrap();
        assert!(info.is_bad("Fp2"));

        let err = info.mark_bads(&["Fp1", "EEG 053"]).unwrap_err();
        assert_eq!(err, EegError::ChannelNotFound { name: "EEG 053".to_string() });
        // Nothing is marked when any name is unknown
        assert!(!info.is_bad("Fp1"));
    }

    #[test]
    fn test_picks_by_type() {
        let mut info = info();
        assert_eq!(info.picks_by_type(&[ChannelType::Eeg], false), vec![0, 1, 2]);
        info.mark_bads(&["Fp1"]).unwrap();
        assert_eq!(info.picks_by_type(&[ChannelType::Eeg], true), vec![1, 2]);
        assert_eq!(
            info.picks_by_type(&[ChannelType::Eeg, ChannelType::Eog], true),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_pick_keeps_relevant_bads() {
        let mut info = info();
        info.mark_bads(&["Fp1", "Cz"]).unwrap();
        let picked = info.pick(&[2, 3]).unwrap();
        assert_eq!(picked.ch_names(), vec!["Cz".to_string(), "EOG 061".to_string()]);
        assert!(picked.is_bad("Cz"));
        assert!(!picked.is_bad("Fp1"));
        assert!(info.pick(&[9]).is_err());
    }

    #[test]
    fn test_summary() {
        let summary = info().summary();
        assert!(summary.contains("5 channels"));
        assert!(summary.contains("3 EEG"));
    }
}
