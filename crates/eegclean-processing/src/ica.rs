//! Independent component analysis of multichannel recordings
//!
//! FastICA itself comes from `linfa-ica`. This module prepares the data
//! (channel selection, segment rejection, decimation, centring and scaling),
//! derives the unmixing and mixing matrices by least squares, and applies the
//! fitted transform to recordings and epochs.

use eegclean_core::{ChannelType, EegError, EegResult, Epochs, RawRecording};
use linfa::prelude::*;
use linfa_ica::fast_ica::FastIca;
use ndarray::{s, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, info, warn};

/// Parameters for fitting ICA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcaSettings {
    /// Number of components to estimate
    pub n_components: usize,
    /// Use every n-th sample for fitting
    pub decim: usize,
    /// Peak-to-peak limit per segment (V); segments above it are skipped
    pub reject: Option<f64>,
    /// Segment length for rejection (s)
    pub tstep: f64,
    /// FastICA iteration cap
    pub max_iter: usize,
    /// FastICA convergence tolerance
    pub tol: f64,
    /// Seed for the FastICA starting point; unseeded when `None`
    #[serde(default = "default_random_state")]
    pub random_state: Option<usize>,
}

fn default_random_state() -> Option<usize> {
    Some(42)
}

impl Default for IcaSettings {
    fn default() -> Self {
        Self {
            n_components: 25,
            decim: 3,
            reject: Some(2e-4),
            tstep: 2.0,
            max_iter: 200,
            tol: 1e-4,
            random_state: default_random_state(),
        }
    }
}

/// A fitted ICA transform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ica {
    pub settings: IcaSettings,
    /// Channels the transform was fitted on, in matrix order
    pub ch_names: Vec<String>,
    /// Per-channel mean removed before unmixing
    pub mean: Vec<f64>,
    /// Global scale applied after centring
    pub pre_scale: f64,
    /// `components x channels`
    pub unmixing: Array2<f64>,
    /// `channels x components`
    pub mixing: Array2<f64>,
    /// Share of the fitted variance carried by each component
    pub explained_variance: Vec<f64>,
    /// Components removed by [`Ica::apply`]
    pub exclude: Vec<usize>,
    /// Component indices found per artifact kind, e.g. "eog"
    pub labels: BTreeMap<String, Vec<usize>>,
    /// Number of samples used for fitting after rejection and decimation
    pub n_samples_fit: usize,
}

impl Ica {
    /// Fit on the picked channels of `raw` (good EEG channels when `None`).
    ///
    /// Bad channels are dropped from the picks.
    pub fn fit(raw: &RawRecording, picks: Option<&[usize]>, settings: &IcaSettings) -> EegResult<Self> {
        if settings.decim == 0 {
            return Err(EegError::Decomposition {
                reason: "decim must be at least 1".to_string(),
            });
        }

        let picks: Vec<usize> = match picks {
            Some(p) => p
                .iter()
                .copied()
                .filter(|&i| {
                    let bad = raw.info.channels.get(i).map_or(false, |c| raw.info.is_bad(&c.name));
                    if bad {
                        debug!("Dropping bad channel {} from ICA picks", raw.info.channels[i].name);
                    }
                    !bad
                })
                .collect(),
            None => raw.picks_by_type(&[ChannelType::Eeg], true),
        };
        let n_channels = picks.len();
        if n_channels == 0 {
            return Err(EegError::Decomposition {
                reason: "No channels selected for ICA".to_string(),
            });
        }
        if settings.n_components == 0 || settings.n_components > n_channels {
            return Err(EegError::Decomposition {
                reason: format!(
                    "Number of components ({}) must be between 1 and the number of channels ({})",
                    settings.n_components, n_channels
                ),
            });
        }

        let data = raw.get_data(&picks)?;
        let kept = select_clean_samples(&data, raw.sfreq(), settings)?;
        let n_samples = kept.ncols();
        if n_samples == 0 {
            return Err(EegError::Decomposition {
                reason: "No data left after rejection and decimation".to_string(),
            });
        }
        if settings.n_components > n_samples {
            return Err(EegError::Decomposition {
                reason: format!(
                    "Number of components ({}) exceeds the number of samples ({})",
                    settings.n_components, n_samples
                ),
            });
        }

        let mean = kept.mean_axis(Axis(1)).ok_or_else(|| EegError::Decomposition {
            reason: "Cannot centre empty data".to_string(),
        })?;
        let mut centered = kept;
        for (mut row, &m) in centered.rows_mut().into_iter().zip(mean.iter()) {
            row.mapv_inplace(|x| x - m);
        }
        let pre_scale = (centered.mapv(|x| x * x).sum() / centered.len() as f64).sqrt();
        if !(pre_scale > 0.0) || !pre_scale.is_finite() {
            return Err(EegError::Decomposition {
                reason: "Data to decompose is flat or not finite".to_string(),
            });
        }

        // linfa works on samples x features
        let data_matrix = centered.t().mapv(|x| x / pre_scale);

        info!(
            "Fitting ICA: {} components on {} channels x {} samples",
            settings.n_components, n_channels, n_samples
        );
        let dataset = DatasetBase::from(data_matrix.clone());
        let mut params = FastIca::params()
            .ncomponents(settings.n_components)
            .max_iter(settings.max_iter)
            .tol(settings.tol);
        if let Some(seed) = settings.random_state {
            params = params.random_state(seed);
        }
        let fitted = params
            .fit(&dataset)
            .map_err(|e| EegError::Decomposition {
                reason: format!("FastICA failed: {:?}", e),
            })?;
        let sources = fitted.predict(&data_matrix);

        let (mixing, unmixing) = compute_mixing_unmixing(&data_matrix, &sources)?;

        // Order components by explained variance, largest first
        let total: f64 = data_matrix.mapv(|x| x * x).sum();
        let variance: Vec<f64> = (0..settings.n_components)
            .map(|k| {
                let a = mixing.column(k).mapv(|x| x * x).sum();
                let s = sources.column(k).mapv(|x| x * x).sum();
                a * s / total
            })
            .collect();
        let mut order: Vec<usize> = (0..settings.n_components).collect();
        order.sort_by(|&a, &b| variance[b].total_cmp(&variance[a]));

        let unmixing = unmixing.select(Axis(0), &order);
        let mixing = mixing.select(Axis(1), &order);
        let explained_variance: Vec<f64> = order.iter().map(|&k| variance[k]).collect();

        debug!("Explained variance: {:?}", explained_variance);

        Ok(Ica {
            settings: settings.clone(),
            ch_names: picks.iter().map(|&i| raw.info.channels[i].name.clone()).collect(),
            mean: mean.to_vec(),
            pre_scale,
            unmixing,
            mixing,
            explained_variance,
            exclude: Vec::new(),
            labels: BTreeMap::new(),
            n_samples_fit: n_samples,
        })
    }

    pub fn n_components(&self) -> usize {
        self.unmixing.nrows()
    }

    /// Share of the fitted variance per component
    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    /// Rows of the fitted channels in `raw`, in fit order
    fn fitted_picks(&self, ch_names: &[String]) -> EegResult<Vec<usize>> {
        self.ch_names
            .iter()
            .map(|name| {
                ch_names
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| EegError::ChannelNotFound { name: name.clone() })
            })
            .collect()
    }

    // Centre, scale and unmix a `channels x samples` block
    fn unmix(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut x = data.clone();
        for (mut row, &m) in x.rows_mut().into_iter().zip(self.mean.iter()) {
            row.mapv_inplace(|v| (v - m) / self.pre_scale);
        }
        self.unmixing.dot(&x)
    }

    /// Component time courses, `components x samples`
    pub fn get_sources(&self, raw: &RawRecording) -> EegResult<Array2<f64>> {
        let picks = self.fitted_picks(&raw.info.ch_names())?;
        Ok(self.unmix(&raw.get_data(&picks)?))
    }

    /// Component time courses per epoch, `epochs x components x times`
    pub fn get_sources_epochs(&self, epochs: &Epochs) -> EegResult<Array3<f64>> {
        let picks = self.fitted_picks(&epochs.info.ch_names())?;
        let mut out = Array3::zeros((epochs.n_epochs(), self.n_components(), epochs.n_times()));
        for (e, epoch) in epochs.data.outer_iter().enumerate() {
            let block = epoch.select(Axis(0), &picks);
            out.slice_mut(s![e, .., ..]).assign(&self.unmix(&block));
        }
        Ok(out)
    }

    /// Remove the excluded components from the fitted channels of `raw`
    pub fn apply(&self, raw: &mut RawRecording) -> EegResult<()> {
        let n = self.n_components();
        if let Some(&bad) = self.exclude.iter().find(|&&k| k >= n) {
            return Err(EegError::Decomposition {
                reason: format!("Excluded component {} out of range for {} components", bad, n),
            });
        }
        if self.exclude.is_empty() {
            warn!("No components excluded, recording left unchanged");
            return Ok(());
        }

        let picks = self.fitted_picks(&raw.info.ch_names())?;
        let data = raw.get_data(&picks)?;
        let sources = self.unmix(&data);

        let excluded_sources = sources.select(Axis(0), &self.exclude);
        let excluded_mixing = self.mixing.select(Axis(1), &self.exclude);
        let artifact = excluded_mixing.dot(&excluded_sources) * self.pre_scale;

        for (row_idx, &ch) in picks.iter().enumerate() {
            let mut row = raw.data.row_mut(ch);
            row -= &artifact.row(row_idx);
        }

        info!(
            "Removed {} component(s) {:?} from {} channels",
            self.exclude.len(),
            self.exclude,
            picks.len()
        );
        Ok(())
    }

    /// Write the fitted transform as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> EegResult<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        info!("Saved ICA to {}", path.as_ref().display());
        Ok(())
    }

    /// Read a transform written by [`Ica::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> EegResult<Self> {
        let file = File::open(path.as_ref())?;
        let ica: Ica = serde_json::from_reader(BufReader::new(file))?;
        if ica.unmixing.ncols() != ica.ch_names.len() || ica.mixing.nrows() != ica.ch_names.len() {
            return Err(EegError::Format {
                reason: "ICA matrices do not match the channel list".to_string(),
            });
        }
        Ok(ica)
    }
}

/// Drop segments over the rejection limit, then keep every `decim`-th sample
fn select_clean_samples(data: &Array2<f64>, sfreq: f64, settings: &IcaSettings) -> EegResult<Array2<f64>> {
    let n = data.ncols();
    let mut keep: Vec<usize> = Vec::with_capacity(n);

    match settings.reject {
        Some(limit) => {
            let step = ((settings.tstep * sfreq).round() as usize).max(1);
            let mut rejected = 0;
            for start in (0..n).step_by(step) {
                let stop = (start + step).min(n);
                let segment = data.slice(s![.., start..stop]);
                let too_large = segment.outer_iter().any(|row| {
                    let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
                    let min = row.fold(f64::INFINITY, |a, &b| a.min(b));
                    max - min > limit
                });
                if too_large {
                    rejected += 1;
                } else {
                    keep.extend(start..stop);
                }
            }
            if rejected > 0 {
                info!("Rejected {} segment(s) of {} s above {:e}", rejected, settings.tstep, limit);
            }
        }
        None => keep.extend(0..n),
    }

    let decimated: Vec<usize> = keep.into_iter().step_by(settings.decim).collect();
    Ok(data.select(Axis(1), &decimated))
}

/// Mixing and unmixing matrices by least squares, with
/// `X` as `samples x channels` and `S` as `samples x components`.
///
/// Unmixing solves `S = X W^T`; mixing solves `X = S A^T`.
fn compute_mixing_unmixing(x: &Array2<f64>, sources: &Array2<f64>) -> EegResult<(Array2<f64>, Array2<f64>)> {
    let xtx_inv = invert_matrix(&x.t().dot(x))?;
    let unmixing = xtx_inv.dot(&x.t().dot(sources)).reversed_axes();

    let sts_inv = invert_matrix(&sources.t().dot(sources))?;
    let mixing = x.t().dot(sources).dot(&sts_inv);

    Ok((mixing, unmixing))
}

/// Invert a square matrix using Gauss-Jordan elimination with partial pivoting
pub(crate) fn invert_matrix(matrix: &Array2<f64>) -> EegResult<Array2<f64>> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return Err(EegError::Decomposition {
            reason: "Matrix must be square".to_string(),
        });
    }

    let scale = matrix.iter().fold(0.0f64, |a, &b| a.max(b.abs()));
    let tolerance = 1e-12 * scale.max(f64::MIN_POSITIVE);

    // Augmented matrix [A | I]
    let mut aug = Array2::<f64>::zeros((n, 2 * n));
    aug.slice_mut(s![.., ..n]).assign(matrix);
    for i in 0..n {
        aug[[i, n + i]] = 1.0;
    }

    for i in 0..n {
        let mut max_row = i;
        for k in (i + 1)..n {
            if aug[[k, i]].abs() > aug[[max_row, i]].abs() {
                max_row = k;
            }
        }
        if max_row != i {
            for j in 0..(2 * n) {
                aug.swap([i, j], [max_row, j]);
            }
        }

        let pivot = aug[[i, i]];
        if pivot.abs() < tolerance {
            return Err(EegError::Decomposition {
                reason: "Matrix is singular or nearly singular".to_string(),
            });
        }
        for j in 0..(2 * n) {
            aug[[i, j]] /= pivot;
        }

        for k in 0..n {
            if k != i {
                let factor = aug[[k, i]];
                if factor != 0.0 {
                    for j in 0..(2 * n) {
                        aug[[k, j]] -= factor * aug[[i, j]];
                    }
                }
            }
        }
    }

    Ok(aug.slice(s![.., n..]).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eegclean_core::RecordingInfo;
    use ndarray::array;
    use std::f64::consts::PI;

    /// Four channels mixing a square wave, a sine and two noise-like sources
    fn mixed_recording() -> RawRecording {
        let labels = ["Fp1", "Fp2", "Cz", "Oz", "EOG 061"];
        let info = RecordingInfo::from_labels(100.0, &labels).unwrap();
        let n = 3000;
        let mixing = array![
            [1.0, 0.3, 0.2, 0.1],
            [0.8, 0.4, 0.1, 0.3],
            [0.1, 1.0, 0.3, 0.2],
            [0.05, 0.2, 1.0, 0.6],
        ];
        let mut state = 12345u64;
        let mut noise = move || {
            // xorshift, enough for test data
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 10_000) as f64 / 10_000.0 - 0.5
        };
        let mut sources = Array2::zeros((4, n));
        for i in 0..n {
            let t = i as f64 / 100.0;
            sources[[0, i]] = if (t * 0.7).fract() < 0.5 { 1.0 } else { -1.0 };
            sources[[1, i]] = (2.0 * PI * 3.0 * t).sin();
            sources[[2, i]] = noise();
            sources[[3, i]] = noise();
        }
        let eeg = mixing.dot(&sources) * 1e-5;
        let mut data = Array2::zeros((5, n));
        data.slice_mut(s![..4, ..]).assign(&eeg);
        data.row_mut(4).assign(&sources.row(0));
        RawRecording::new(data, info).unwrap()
    }

    fn settings(n_components: usize) -> IcaSettings {
        IcaSettings {
            n_components,
            decim: 1,
            reject: None,
            max_iter: 1000,
            ..IcaSettings::default()
        }
    }

    #[test]
    fn test_invert_matrix() {
        let m = array![[4.0, 7.0], [2.0, 6.0]];
        let inv = invert_matrix(&m).unwrap();
        let identity = m.dot(&inv);
        assert!((identity[[0, 0]] - 1.0).abs() < 1e-12);
        assert!(identity[[0, 1]].abs() < 1e-12);

        let singular = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(invert_matrix(&singular).is_err());
    }

    #[test]
    fn test_fit_shapes_and_variance() {
        let raw = mixed_recording();
        let ica = Ica::fit(&raw, None, &settings(4)).unwrap();

        assert_eq!(ica.ch_names, vec!["Fp1", "Fp2", "Cz", "Oz"]);
        assert_eq!(ica.unmixing.shape(), &[4, 4]);
        assert_eq!(ica.mixing.shape(), &[4, 4]);

        let ev = ica.explained_variance();
        assert!(ev.windows(2).all(|w| w[0] >= w[1]));
        assert!(ev.iter().sum::<f64>() > 0.9);

        let sources = ica.get_sources(&raw).unwrap();
        assert_eq!(sources.shape(), &[4, 3000]);
    }

    #[test]
    fn test_apply_removes_excluded_component() {
        let raw = mixed_recording();
        let mut ica = Ica::fit(&raw, None, &settings(4)).unwrap();

        // The square wave is the component best correlated with the EOG row
        let sources = ica.get_sources(&raw).unwrap();
        let target = raw.channel_data(4).unwrap().to_vec();
        let best = (0..4)
            .max_by(|&a, &b| {
                let ca = crate::artifacts::pearson(&sources.row(a).to_vec(), &target).abs();
                let cb = crate::artifacts::pearson(&sources.row(b).to_vec(), &target).abs();
                ca.total_cmp(&cb)
            })
            .unwrap();
        ica.exclude = vec![best];

        let mut cleaned = raw.copy();
        ica.apply(&mut cleaned).unwrap();

        let before = crate::artifacts::pearson(&raw.channel_data(0).unwrap().to_vec(), &target);
        let after = crate::artifacts::pearson(&cleaned.channel_data(0).unwrap().to_vec(), &target);
        assert!(before.abs() > 0.8);
        assert!(after.abs() < 0.2, "correlation after removal {}", after);

        // EOG row is not part of the fit and stays untouched
        assert_eq!(cleaned.channel_data(4).unwrap(), raw.channel_data(4).unwrap());
    }

    #[test]
    fn test_apply_without_exclusions_is_identity() {
        let raw = mixed_recording();
        let ica = Ica::fit(&raw, None, &settings(3)).unwrap();
        let mut copy = raw.copy();
        ica.apply(&mut copy).unwrap();
        assert_eq!(copy.data, raw.data);
    }

    #[test]
    fn test_fit_errors() {
        let raw = mixed_recording();
        let err = Ica::fit(&raw, None, &settings(5)).unwrap_err();
        assert!(matches!(err, EegError::Decomposition { .. }));

        // Every segment exceeds a tiny rejection limit
        let strict = IcaSettings {
            reject: Some(1e-9),
            ..settings(2)
        };
        assert!(Ica::fit(&raw, None, &strict).is_err());
    }

    #[test]
    fn test_rejection_and_decimation() {
        let mut data = Array2::zeros((1, 1000));
        data[[0, 150]] = 1.0;
        let settings = IcaSettings {
            reject: Some(0.5),
            tstep: 1.0,
            decim: 3,
            ..IcaSettings::default()
        };
        // Ten 100-sample segments, the second one holds the spike
        let kept = select_clean_samples(&data, 100.0, &settings).unwrap();
        assert_eq!(kept.ncols(), 300);
        assert!(kept.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_save_load() {
        let raw = mixed_recording();
        let mut ica = Ica::fit(&raw, None, &settings(3)).unwrap();
        ica.exclude = vec![1];
        ica.labels.insert("eog".to_string(), vec![1]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ica.json");
        ica.save(&path).unwrap();
        let loaded = Ica::load(&path).unwrap();

        assert_eq!(loaded.exclude, vec![1]);
        assert_eq!(loaded.ch_names, ica.ch_names);
        assert_eq!(loaded.labels["eog"], vec![1]);
        let diff = (&loaded.unmixing - &ica.unmixing).mapv(f64::abs).sum();
        assert!(diff < 1e-9);
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let raw = mixed_recording();
        let first = Ica::fit(&raw, None, &settings(4)).unwrap();
        let second = Ica::fit(&raw, None, &settings(4)).unwrap();

        assert_eq!(first.settings.random_state, Some(42));
        assert_eq!(first.unmixing, second.unmixing);
        assert_eq!(first.explained_variance, second.explained_variance);
    }

    #[test]
    fn test_random_state_defaults_when_missing() {
        let mut value = serde_json::to_value(IcaSettings::default()).unwrap();
        value.as_object_mut().unwrap().remove("random_state");
        let settings: IcaSettings = serde_json::from_value(value).unwrap();
        assert_eq!(settings.random_state, Some(42));
    }
}
