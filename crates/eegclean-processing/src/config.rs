//! Configuration for the preprocessing pipeline

use crate::artifacts::DEFAULT_THRESHOLD;
use crate::ica::IcaSettings;
use eegclean_core::{ChannelType, EegError, EegResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Parameter presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingProfile {
    /// Full-rank decomposition with the usual 0.5-40 Hz band
    Standard,
    /// Fewer components and heavier decimation for a fast first look
    Quick,
    /// Hand-edited parameters
    Custom,
}

/// Bandpass parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    /// Highpass edge (Hz); `None` for a lowpass only
    pub l_freq: Option<f64>,
    /// Lowpass edge (Hz); `None` for a highpass only
    pub h_freq: Option<f64>,
    /// Channel kinds to filter
    pub channel_types: Vec<ChannelType>,
    /// Worker threads for per-channel filtering
    pub n_jobs: usize,
}

/// Blink detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EogParams {
    /// Reference channel; the first EOG channel when `None`
    pub ch_name: Option<String>,
    /// |z| threshold for flagging components
    pub threshold: f64,
    pub tmin: f64,
    pub tmax: f64,
    /// Baseline window for the EOG epochs (s)
    pub baseline: Option<(f64, f64)>,
    /// Peak-to-peak limit on EEG channels for keeping an EOG epoch (V)
    #[serde(default = "default_eog_reject")]
    pub reject: Option<f64>,
}

fn default_eog_reject() -> Option<f64> {
    Some(2e-4)
}

/// Where results are written
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputParams {
    /// Cleaned recording; overwritten when present
    pub path: Option<PathBuf>,
    /// Fitted ICA as JSON
    pub ica_path: Option<PathBuf>,
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub profile: ProcessingProfile,
    /// Channels marked bad before filtering
    pub bads: Vec<String>,
    pub filter: FilterParams,
    pub ica: IcaSettings,
    pub eog: EogParams,
    #[serde(default)]
    pub output: OutputParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::standard()
    }
}

fn default_n_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

impl PipelineConfig {
    /// Parameters for the usual blink-removal run
    pub fn standard() -> Self {
        Self {
            name: "Standard".to_string(),
            profile: ProcessingProfile::Standard,
            bads: vec!["EEG 053".to_string()],
            filter: FilterParams {
                l_freq: Some(0.5),
                h_freq: Some(40.0),
                channel_types: vec![ChannelType::Eeg, ChannelType::Eog],
                n_jobs: default_n_jobs(),
            },
            ica: IcaSettings::default(),
            eog: EogParams {
                ch_name: Some("EOG 061".to_string()),
                threshold: DEFAULT_THRESHOLD,
                tmin: -0.5,
                tmax: 0.5,
                baseline: None,
                reject: default_eog_reject(),
            },
            output: OutputParams::default(),
        }
    }

    /// Cheaper parameters for a first look at a recording
    pub fn quick() -> Self {
        let mut config = Self::standard();
        config.name = "Quick".to_string();
        config.profile = ProcessingProfile::Quick;
        config.filter.l_freq = Some(1.0);
        config.ica = IcaSettings {
            n_components: 15,
            decim: 5,
            max_iter: 100,
            ..IcaSettings::default()
        };
        config
    }

    /// Create configuration for a given profile
    pub fn for_profile(profile: ProcessingProfile) -> Self {
        match profile {
            ProcessingProfile::Standard => Self::standard(),
            ProcessingProfile::Quick => Self::quick(),
            ProcessingProfile::Custom => {
                let mut config = Self::standard();
                config.name = "Custom".to_string();
                config.profile = ProcessingProfile::Custom;
                config
            }
        }
    }

    /// Check parameter ranges that do not depend on the recording
    pub fn validate(&self) -> EegResult<()> {
        let filter = &self.filter;
        if filter.l_freq.is_none() && filter.h_freq.is_none() {
            return Err(config_error("At least one filter edge must be set"));
        }
        if let Some(l) = filter.l_freq {
            if !(l > 0.0) || !l.is_finite() {
                return Err(config_error(format!("Highpass edge must be positive, got {}", l)));
            }
        }
        if let Some(h) = filter.h_freq {
            if !(h > 0.0) || !h.is_finite() {
                return Err(config_error(format!("Lowpass edge must be positive, got {}", h)));
            }
        }
        if let (Some(l), Some(h)) = (filter.l_freq, filter.h_freq) {
            if l >= h {
                return Err(config_error(format!(
                    "Highpass edge ({} Hz) must be below lowpass edge ({} Hz)",
                    l, h
                )));
            }
        }
        if filter.channel_types.is_empty() {
            return Err(config_error("No channel types selected for filtering"));
        }
        if filter.n_jobs == 0 {
            return Err(config_error("n_jobs must be at least 1"));
        }

        let ica = &self.ica;
        if ica.n_components == 0 {
            return Err(config_error("ICA needs at least one component"));
        }
        if ica.decim == 0 {
            return Err(config_error("ICA decimation must be at least 1"));
        }
        if ica.max_iter == 0 || !(ica.tol > 0.0) {
            return Err(config_error("ICA max_iter and tol must be positive"));
        }
        if !(ica.tstep > 0.0) {
            return Err(config_error("ICA rejection step must be positive"));
        }
        if let Some(reject) = ica.reject {
            if !(reject > 0.0) {
                return Err(config_error("Rejection threshold must be positive"));
            }
        }

        if !(self.eog.threshold > 0.0) {
            return Err(config_error("EOG threshold must be positive"));
        }
        if let Some(reject) = self.eog.reject {
            if !(reject > 0.0) {
                return Err(config_error("EOG rejection threshold must be positive"));
            }
        }
        if !(self.eog.tmin < self.eog.tmax) {
            return Err(config_error(format!(
                "EOG epoch window is empty: [{}, {}]",
                self.eog.tmin, self.eog.tmax
            )));
        }

        Ok(())
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> EegResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| EegError::ConfigurationError {
            message: format!("Failed to serialize configuration: {}", e),
        })
    }

    /// Import configuration from JSON
    pub fn from_json(json: &str) -> EegResult<Self> {
        serde_json::from_str(json).map_err(|e| EegError::ConfigurationError {
            message: format!("Failed to deserialize configuration: {}", e),
        })
    }

    /// Read and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> EegResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&json)?;
        config.validate()?;
        Ok(config)
    }
}

fn config_error(message: impl Into<String>) -> EegError {
    EegError::ConfigurationError {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_defaults() {
        let config = PipelineConfig::standard();
        assert_eq!(config.filter.l_freq, Some(0.5));
        assert_eq!(config.filter.h_freq, Some(40.0));
        assert_eq!(config.ica.n_components, 25);
        assert_eq!(config.ica.decim, 3);
        assert_eq!(config.ica.reject, Some(2e-4));
        assert_eq!(config.eog.ch_name.as_deref(), Some("EOG 061"));
        assert_eq!(config.eog.reject, Some(2e-4));
        assert_eq!(config.bads, vec!["EEG 053"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_profiles() {
        assert_eq!(PipelineConfig::for_profile(ProcessingProfile::Quick).ica.n_components, 15);
        let custom = PipelineConfig::for_profile(ProcessingProfile::Custom);
        assert_eq!(custom.profile, ProcessingProfile::Custom);
        assert!(custom.validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = PipelineConfig::quick();
        config.output.path = Some(PathBuf::from("clean.edf"));
        config.eog.baseline = Some((-0.5, -0.2));

        let json = config.to_json().unwrap();
        let restored = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(restored.profile, ProcessingProfile::Quick);
        assert_eq!(restored.output, config.output);
        assert_eq!(restored.filter.channel_types, config.filter.channel_types);
        assert_eq!(restored.ica.n_components, 15);
        assert_eq!(restored.eog.baseline, Some((-0.5, -0.2)));
        assert!((restored.ica.reject.unwrap() - 2e-4).abs() < 1e-12);
    }

    #[test]
    fn test_eog_reject_defaults_when_missing() {
        let mut value: serde_json::Value = serde_json::from_str(&PipelineConfig::standard().to_json().unwrap()).unwrap();
        value["eog"].as_object_mut().unwrap().remove("reject");
        let config = PipelineConfig::from_json(&value.to_string()).unwrap();
        assert_eq!(config.eog.reject, Some(2e-4));
    }

    #[test]
    fn test_output_section_optional() {
        let mut value: serde_json::Value = serde_json::from_str(&PipelineConfig::standard().to_json().unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("output");
        let config = PipelineConfig::from_json(&value.to_string()).unwrap();
        assert_eq!(config.output, OutputParams::default());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = PipelineConfig::standard();
        config.filter.l_freq = Some(50.0);
        assert!(matches!(config.validate(), Err(EegError::ConfigurationError { .. })));

        let mut config = PipelineConfig::standard();
        config.filter.l_freq = None;
        config.filter.h_freq = None;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::standard();
        config.ica.n_components = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::standard();
        config.eog.tmin = 0.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::standard();
        config.eog.reject = Some(0.0);
        assert!(config.validate().is_err());

        assert!(PipelineConfig::from_json("{ not json").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, PipelineConfig::standard().to_json().unwrap()).unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.profile, ProcessingProfile::Standard);

        let mut bad = PipelineConfig::standard();
        bad.ica.decim = 0;
        std::fs::write(&path, bad.to_json().unwrap()).unwrap();
        assert!(PipelineConfig::from_file(&path).is_err());
    }
}
