//! Scoring ICA components against a reference channel and picking outliers

use crate::eog::{eog_channel_index, EOG_H_FREQ, EOG_L_FREQ};
use crate::filters::{apply_zero_phase, FirDesign};
use crate::ica::Ica;
use eegclean_core::{EegResult, Epochs, Event, Evoked, RawRecording, RecordingInfo};
use ndarray::{s, Array2};
use tracing::{debug, info};

/// Default |z| above which a score is an outlier
pub const DEFAULT_THRESHOLD: f64 = 3.0;

/// Passes of adaptive z-scoring
pub const DEFAULT_OUTLIER_ITERATIONS: usize = 2;

/// Data a fitted ICA can be scored on
#[derive(Debug, Clone, Copy)]
pub enum Instance<'a> {
    Raw(&'a RawRecording),
    /// Scored as the epochs laid end to end
    Epochs(&'a Epochs),
}

impl<'a> From<&'a RawRecording> for Instance<'a> {
    fn from(raw: &'a RawRecording) -> Self {
        Instance::Raw(raw)
    }
}

impl<'a> From<&'a Epochs> for Instance<'a> {
    fn from(epochs: &'a Epochs) -> Self {
        Instance::Epochs(epochs)
    }
}

impl<'a> Instance<'a> {
    fn info(&self) -> &RecordingInfo {
        match self {
            Instance::Raw(raw) => &raw.info,
            Instance::Epochs(epochs) => &epochs.info,
        }
    }

    /// Reference channel: the named one, or the first EOG channel
    fn reference_channel(&self, ch_name: Option<&str>) -> EegResult<usize> {
        eog_channel_index(self.info(), ch_name)
    }

    /// Component time courses, `components x samples`
    fn sources(&self, ica: &Ica) -> EegResult<Array2<f64>> {
        match self {
            Instance::Raw(raw) => ica.get_sources(raw),
            Instance::Epochs(epochs) => {
                let per_epoch = ica.get_sources_epochs(epochs)?;
                let (n_epochs, n_comps, n_times) = per_epoch.dim();
                let mut out = Array2::zeros((n_comps, n_epochs * n_times));
                for e in 0..n_epochs {
                    out.slice_mut(s![.., e * n_times..(e + 1) * n_times])
                        .assign(&per_epoch.slice(s![e, .., ..]));
                }
                Ok(out)
            }
        }
    }

    fn channel(&self, idx: usize) -> EegResult<Vec<f64>> {
        match self {
            Instance::Raw(raw) => Ok(raw.channel_data(idx)?.to_vec()),
            Instance::Epochs(epochs) => Ok(epochs.concatenated().row(idx).to_vec()),
        }
    }
}

/// Blink detection results kept for inspection
#[derive(Debug, Clone)]
pub struct EogReport {
    /// Reference channel name
    pub channel: String,
    pub events: Vec<Event>,
    /// Average of the EOG epochs
    pub evoked: Option<Evoked>,
    /// Components flagged as EOG-related, strongest first
    pub indices: Vec<usize>,
    /// Correlation of every component with the reference
    pub scores: Vec<f64>,
}

/// Pearson correlation; zero when either input is constant
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a[..n].iter().zip(&b[..n]) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = (var_a * var_b).sqrt();
    if denom > 0.0 {
        cov / denom
    } else {
        0.0
    }
}

/// Indices whose |z| exceeds `threshold`, with iterative masking.
///
/// Each pass z-scores the entries not yet flagged (population standard
/// deviation) and flags those above the threshold. Stops after `max_iter`
/// passes or when a pass flags nothing new. Returned indices are ascending.
pub fn find_outliers(scores: &[f64], threshold: f64, max_iter: usize) -> Vec<usize> {
    let mut flagged = vec![false; scores.len()];

    for pass in 0..max_iter {
        let remaining: Vec<f64> = scores
            .iter()
            .zip(&flagged)
            .filter(|(_, &f)| !f)
            .map(|(&s, _)| s)
            .collect();
        if remaining.len() < 2 {
            break;
        }
        let mean = remaining.iter().sum::<f64>() / remaining.len() as f64;
        let std = (remaining.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / remaining.len() as f64).sqrt();
        if !(std > 0.0) {
            break;
        }

        let mut new_outliers = 0;
        for (i, &s) in scores.iter().enumerate() {
            if !flagged[i] && ((s - mean) / std).abs() > threshold {
                flagged[i] = true;
                new_outliers += 1;
            }
        }
        debug!("Outlier pass {}: {} new", pass + 1, new_outliers);
        if new_outliers == 0 {
            break;
        }
    }

    flagged
        .iter()
        .enumerate()
        .filter_map(|(i, &f)| f.then_some(i))
        .collect()
}

fn band_design(sfreq: f64, l_freq: Option<f64>, h_freq: Option<f64>) -> EegResult<Option<FirDesign>> {
    if l_freq.is_none() && h_freq.is_none() {
        return Ok(None);
    }
    FirDesign::bandpass(sfreq, l_freq, h_freq).map(Some)
}

fn filter_with(signal: Vec<f64>, design: Option<&FirDesign>) -> EegResult<Vec<f64>> {
    match design {
        Some(d) => apply_zero_phase(&signal, &d.taps),
        None => Ok(signal),
    }
}

impl Ica {
    /// Correlation of every component with the `target` channel of `inst`.
    ///
    /// Sources and target are bandpassed first when an edge is given.
    pub fn score_sources<'a>(
        &self,
        inst: impl Into<Instance<'a>>,
        target: &str,
        l_freq: Option<f64>,
        h_freq: Option<f64>,
    ) -> EegResult<Vec<f64>> {
        let inst = inst.into();
        let idx = inst.info().channel_index(target)?;
        self.score_against(&inst, idx, l_freq, h_freq)
    }

    fn score_against(
        &self,
        inst: &Instance<'_>,
        target_idx: usize,
        l_freq: Option<f64>,
        h_freq: Option<f64>,
    ) -> EegResult<Vec<f64>> {
        let design = band_design(inst.info().sfreq, l_freq, h_freq)?;
        let sources = inst.sources(self)?;
        let target = filter_with(inst.channel(target_idx)?, design.as_ref())?;

        sources
            .outer_iter()
            .map(|row| {
                let filtered = filter_with(row.to_vec(), design.as_ref())?;
                Ok(pearson(&filtered, &target))
            })
            .collect()
    }

    /// Components correlated with the EOG reference.
    ///
    /// Returns the flagged indices, strongest |score| first, and the scores of
    /// all components. The indices are stored under `labels["eog"]`.
    pub fn find_bads_eog<'a>(
        &mut self,
        inst: impl Into<Instance<'a>>,
        ch_name: Option<&str>,
        threshold: f64,
    ) -> EegResult<(Vec<usize>, Vec<f64>)> {
        let inst = inst.into();
        let idx = inst.reference_channel(ch_name)?;
        let name = inst.info().channels[idx].name.clone();

        let scores = self.score_against(&inst, idx, Some(EOG_L_FREQ), Some(EOG_H_FREQ))?;
        let mut indices = find_outliers(&scores, threshold, DEFAULT_OUTLIER_ITERATIONS);
        indices.sort_by(|&a, &b| scores[b].abs().total_cmp(&scores[a].abs()));

        info!("EOG components on {}: {:?}", name, indices);
        self.labels.insert("eog".to_string(), indices.clone());
        Ok((indices, scores))
    }
}
