//! Zero-phase FIR filtering for multichannel recordings

use eegclean_core::{EegError, EegResult, FilterRecord, RawRecording};
use num_complex::Complex;
use rayon::prelude::*;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::{debug, info};

/// Filter shapes produced by [`FirDesign`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
}

/// Windowed-sinc FIR design with automatic transition bandwidths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirDesign {
    pub sfreq: f64,
    /// Highpass edge (Hz)
    pub l_freq: Option<f64>,
    /// Lowpass edge (Hz)
    pub h_freq: Option<f64>,
    /// Width of the lower transition band (Hz)
    pub l_trans: f64,
    /// Width of the upper transition band (Hz)
    pub h_trans: f64,
    /// Kernel coefficients, odd length and symmetric
    pub taps: Vec<f64>,
}

impl FirDesign {
    /// Design a bandpass, highpass (`h_freq = None`) or lowpass (`l_freq = None`)
    /// filter with a Hamming window.
    ///
    /// An `l_freq` of exactly zero counts as no highpass.
    pub fn bandpass(sfreq: f64, l_freq: Option<f64>, h_freq: Option<f64>) -> EegResult<Self> {
        let nyq = sfreq / 2.0;
        let l_freq = l_freq.filter(|&l| l != 0.0);

        if !sfreq.is_finite() || sfreq <= 0.0 {
            return Err(EegError::InvalidFilter {
                reason: format!("Sampling frequency must be positive, got {}", sfreq),
            });
        }
        if let Some(l) = l_freq {
            if !(l > 0.0 && l < nyq) {
                return Err(EegError::InvalidFilter {
                    reason: format!("l_freq {} must lie in (0, {})", l, nyq),
                });
            }
        }
        if let Some(h) = h_freq {
            if !(h > 0.0 && h < nyq) {
                return Err(EegError::InvalidFilter {
                    reason: format!("h_freq {} must lie in (0, {})", h, nyq),
                });
            }
        }

        let (l_trans, h_trans) = match (l_freq, h_freq) {
            (None, None) => {
                return Err(EegError::InvalidFilter {
                    reason: "At least one of l_freq and h_freq must be given".to_string(),
                })
            }
            (Some(l), Some(h)) if l >= h => {
                return Err(EegError::InvalidFilter {
                    reason: format!("l_freq {} must be below h_freq {}", l, h),
                })
            }
            (l, h) => (
                l.map(|l| (0.25 * l).max(2.0).min(l)).unwrap_or(0.0),
                h.map(|h| (0.25 * h).max(2.0).min(nyq - h)).unwrap_or(0.0),
            ),
        };

        let min_trans = match (l_freq, h_freq) {
            (Some(_), Some(_)) => l_trans.min(h_trans),
            (Some(_), None) => l_trans,
            _ => h_trans,
        };
        let mut n_taps = (3.3 / min_trans * sfreq).ceil() as usize;
        if n_taps % 2 == 0 {
            n_taps += 1;
        }

        // Cutoffs at the middle of each transition band, normalised to Nyquist
        let f_low = l_freq.map(|l| (l - l_trans / 2.0) / nyq);
        let f_high = h_freq.map(|h| (h + h_trans / 2.0) / nyq);

        let window = hamming(n_taps);
        let mut taps: Vec<f64> = (0..n_taps)
            .map(|n| {
                let ideal = match (f_low, f_high) {
                    (Some(fl), Some(fh)) => sinc_lowpass(n, n_taps, fh) - sinc_lowpass(n, n_taps, fl),
                    (Some(fl), None) => {
                        let delta = if n == (n_taps - 1) / 2 { 1.0 } else { 0.0 };
                        delta - sinc_lowpass(n, n_taps, fl)
                    }
                    (None, Some(fh)) => sinc_lowpass(n, n_taps, fh),
                    (None, None) => 0.0,
                };
                ideal * window[n]
            })
            .collect();

        // Unit gain at the passband centre
        let centre = match (f_low, f_high) {
            (Some(fl), Some(fh)) => 0.5 * (fl + fh),
            (Some(_), None) => 1.0,
            _ => 0.0,
        };
        let gain = response_at(&taps, centre * PI);
        if gain.abs() < f64::EPSILON {
            return Err(EegError::InvalidFilter {
                reason: "Filter has no gain at its passband centre".to_string(),
            });
        }
        for t in taps.iter_mut() {
            *t /= gain;
        }

        debug!(
            "FIR design l={:?} h={:?} Hz: {} taps, transitions {:.2}/{:.2} Hz",
            l_freq, h_freq, n_taps, l_trans, h_trans
        );

        Ok(FirDesign {
            sfreq,
            l_freq,
            h_freq,
            l_trans,
            h_trans,
            taps,
        })
    }

    pub fn filter_type(&self) -> FilterType {
        match (self.l_freq, self.h_freq) {
            (Some(_), Some(_)) => FilterType::Bandpass,
            (Some(_), None) => FilterType::Highpass,
            _ => FilterType::Lowpass,
        }
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    /// Magnitude response at a frequency in Hz
    pub fn magnitude_at(&self, freq: f64) -> f64 {
        response_at(&self.taps, 2.0 * PI * freq / self.sfreq).abs()
    }
}

/// Symmetric Hamming window
pub fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

// Ideal lowpass tap with cutoff `fc` as a fraction of Nyquist
fn sinc_lowpass(n: usize, n_taps: usize, fc: f64) -> f64 {
    let m = n as f64 - (n_taps - 1) as f64 / 2.0;
    if m == 0.0 {
        fc
    } else {
        (PI * fc * m).sin() / (PI * m)
    }
}

// Amplitude of a symmetric kernel at angular frequency `omega`, delay removed
fn response_at(taps: &[f64], omega: f64) -> f64 {
    let mid = (taps.len() - 1) as f64 / 2.0;
    taps.iter()
        .enumerate()
        .map(|(n, &h)| h * (omega * (n as f64 - mid)).cos())
        .sum()
}

/// FFT overlap-add convolution with delay compensation
pub struct ZeroPhaseConvolver {
    n_taps: usize,
    n_fft: usize,
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
    kernel_spectrum: Vec<Complex<f64>>,
}

impl ZeroPhaseConvolver {
    pub fn new(taps: &[f64]) -> EegResult<Self> {
        if taps.is_empty() || taps.len() % 2 == 0 {
            return Err(EegError::InvalidFilter {
                reason: format!("Zero-phase filtering needs an odd kernel length, got {}", taps.len()),
            });
        }
        let n_taps = taps.len();
        let n_fft = (2 * n_taps).next_power_of_two().max(1024);

        let mut planner = RealFftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(n_fft);
        let inverse = planner.plan_fft_inverse(n_fft);

        let mut padded = forward.make_input_vec();
        padded[..n_taps].copy_from_slice(taps);
        let mut kernel_spectrum = forward.make_output_vec();
        forward
            .process(&mut padded, &mut kernel_spectrum)
            .map_err(|e| EegError::ProcessingError { message: format!("FFT failed: {}", e) })?;

        Ok(Self {
            n_taps,
            n_fft,
            forward,
            inverse,
            kernel_spectrum,
        })
    }

    /// Filter one signal; the output has the input's length
    pub fn apply(&self, signal: &[f64]) -> EegResult<Vec<f64>> {
        if signal.is_empty() {
            return Ok(Vec::new());
        }
        let pad = self.n_taps - 1;
        let x = reflect_limited_pad(signal, pad);

        let block = self.n_fft - self.n_taps + 1;
        let mut full = vec![0.0; x.len() + self.n_taps - 1];

        let mut input = self.forward.make_input_vec();
        let mut spectrum = self.forward.make_output_vec();
        let mut output = self.inverse.make_output_vec();
        let scale = 1.0 / self.n_fft as f64;

        for start in (0..x.len()).step_by(block) {
            let stop = (start + block).min(x.len());
            input.iter_mut().for_each(|v| *v = 0.0);
            input[..stop - start].copy_from_slice(&x[start..stop]);

            self.forward
                .process(&mut input, &mut spectrum)
                .map_err(|e| EegError::ProcessingError { message: format!("FFT failed: {}", e) })?;
            for (s, k) in spectrum.iter_mut().zip(&self.kernel_spectrum) {
                *s = *s * *k;
            }
            // DC and Nyquist bins of a real spectrum are real
            if let Some(first) = spectrum.first_mut() {
                first.im = 0.0;
            }
            if let Some(last) = spectrum.last_mut() {
                last.im = 0.0;
            }
            self.inverse
                .process(&mut spectrum, &mut output)
                .map_err(|e| EegError::ProcessingError { message: format!("Inverse FFT failed: {}", e) })?;

            let n_valid = (stop - start + self.n_taps - 1).min(full.len() - start);
            for (i, &v) in output[..n_valid].iter().enumerate() {
                full[start + i] += v * scale;
            }
        }

        let delay = (self.n_taps - 1) / 2;
        let first = pad + delay;
        Ok(full[first..first + signal.len()].to_vec())
    }
}

/// Pad both ends with an odd reflection of at most `len - 1` samples,
/// filling any remainder with zeros
pub fn reflect_limited_pad(x: &[f64], pad: usize) -> Vec<f64> {
    let n = x.len();
    let reflect = pad.min(n.saturating_sub(1));
    let zeros = pad - reflect;
    let first = x[0];
    let last = x[n - 1];

    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend(std::iter::repeat(0.0).take(zeros));
    out.extend((1..=reflect).rev().map(|k| 2.0 * first - x[k]));
    out.extend_from_slice(x);
    out.extend((1..=reflect).map(|k| 2.0 * last - x[n - 1 - k]));
    out.extend(std::iter::repeat(0.0).take(zeros));
    out
}

/// Filter a single signal with a zero-phase FIR kernel
pub fn apply_zero_phase(signal: &[f64], taps: &[f64]) -> EegResult<Vec<f64>> {
    ZeroPhaseConvolver::new(taps)?.apply(signal)
}

/// Bandpass filter applied across channels of a recording
pub struct BandpassFilter {
    design: FirDesign,
    convolver: ZeroPhaseConvolver,
    n_jobs: usize,
}

impl BandpassFilter {
    pub fn new(sfreq: f64, l_freq: Option<f64>, h_freq: Option<f64>, n_jobs: usize) -> EegResult<Self> {
        let design = FirDesign::bandpass(sfreq, l_freq, h_freq)?;
        let convolver = ZeroPhaseConvolver::new(&design.taps)?;
        Ok(Self {
            design,
            convolver,
            n_jobs: n_jobs.max(1),
        })
    }

    pub fn design(&self) -> &FirDesign {
        &self.design
    }

    /// Filter one signal
    pub fn apply_signal(&self, signal: &[f64]) -> EegResult<Vec<f64>> {
        self.convolver.apply(signal)
    }

    /// Filter the picked channels in place and record the filter in the metadata
    pub fn apply(&self, raw: &mut RawRecording, picks: &[usize]) -> EegResult<()> {
        if (raw.sfreq() - self.design.sfreq).abs() > 1e-9 {
            return Err(EegError::InvalidFilter {
                reason: format!(
                    "Filter designed for {} Hz applied to {} Hz data",
                    self.design.sfreq,
                    raw.sfreq()
                ),
            });
        }
        let rows = raw.get_data(picks)?;

        if rows.ncols() < self.design.len() {
            debug!(
                "Signal of {} samples is shorter than the {}-tap filter",
                rows.ncols(),
                self.design.len()
            );
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.n_jobs)
            .build()
            .map_err(|e| EegError::ProcessingError {
                message: format!("Failed to build filter thread pool: {}", e),
            })?;

        let filtered: Vec<EegResult<Vec<f64>>> = pool.install(|| {
            rows.outer_iter()
                .collect::<Vec<_>>()
                .into_par_iter()
                .map(|row| self.convolver.apply(&row.to_vec()))
                .collect()
        });

        for (&ch, result) in picks.iter().zip(filtered) {
            let values = result?;
            raw.data
                .row_mut(ch)
                .iter_mut()
                .zip(values)
                .for_each(|(dst, v)| *dst = v);
        }

        if let Some(l) = self.design.l_freq {
            raw.info.highpass = l;
        }
        if let Some(h) = self.design.h_freq {
            raw.info.lowpass = h;
        }
        let channels = picks
            .iter()
            .map(|&i| raw.info.channels[i].name.clone())
            .collect();
        raw.info.filter_history.push(FilterRecord {
            l_freq: self.design.l_freq,
            h_freq: self.design.h_freq,
            taps: self.design.len(),
            channels,
        });

        info!(
            "Filtered {} channels {:?}-{:?} Hz with {} taps on {} threads",
            picks.len(),
            self.design.l_freq,
            self.design.h_freq,
            self.design.len(),
            self.n_jobs
        );
        Ok(())
    }
}

/// Filtering entry point on recordings
pub trait FilterExt {
    /// Zero-phase bandpass of the picked channels (all channels when `None`)
    fn filter(
        &mut self,
        l_freq: Option<f64>,
        h_freq: Option<f64>,
        picks: Option<&[usize]>,
        n_jobs: usize,
    ) -> EegResult<()>;
}

impl FilterExt for RawRecording {
    fn filter(
        &mut self,
        l_freq: Option<f64>,
        h_freq: Option<f64>,
        picks: Option<&[usize]>,
        n_jobs: usize,
    ) -> EegResult<()> {
        let all: Vec<usize> = (0..self.n_channels()).collect();
        let picks = picks.unwrap_or(&all);
        BandpassFilter::new(self.sfreq(), l_freq, h_freq, n_jobs)?.apply(self, picks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eegclean_core::RecordingInfo;
    use ndarray::Array2;

    fn tone(freq: f64, sfreq: f64, n: usize, amplitude: f64) -> Vec<f64> {
        (0..n)
            .map(|i| amplitude * (2.0 * PI * freq * i as f64 / sfreq).sin())
            .collect()
    }

    #[test]
    fn test_design_parameters() {
        let design = FirDesign::bandpass(250.0, Some(0.5), Some(40.0)).unwrap();
        assert_eq!(design.filter_type(), FilterType::Bandpass);
        assert_eq!(design.l_trans, 0.5);
        assert_eq!(design.h_trans, 10.0);
        assert_eq!(design.len(), 1651);

        // Symmetric kernel, linear phase
        let n = design.len();
        for i in 0..n / 2 {
            assert!((design.taps[i] - design.taps[n - 1 - i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_design_validation() {
        assert!(FirDesign::bandpass(250.0, None, None).is_err());
        assert!(FirDesign::bandpass(250.0, Some(40.0), Some(10.0)).is_err());
        assert!(FirDesign::bandpass(250.0, Some(1.0), Some(125.0)).is_err());
        assert!(FirDesign::bandpass(250.0, Some(-1.0), None).is_err());

        let lowpass = FirDesign::bandpass(250.0, Some(0.0), Some(40.0)).unwrap();
        assert_eq!(lowpass.filter_type(), FilterType::Lowpass);
        let highpass = FirDesign::bandpass(250.0, Some(1.0), None).unwrap();
        assert_eq!(highpass.filter_type(), FilterType::Highpass);
    }

    #[test]
    fn test_magnitude_response() {
        let design = FirDesign::bandpass(250.0, Some(0.5), Some(40.0)).unwrap();
        assert!((design.magnitude_at(10.0) - 1.0).abs() < 0.01);
        assert!(design.magnitude_at(0.1) < 0.3);
        assert!(design.magnitude_at(60.0) < 0.01);
        assert!(design.magnitude_at(0.0) < 0.02);
    }

    #[test]
    fn test_zero_phase_passes_inband_tone() {
        let sfreq = 250.0;
        let n = 15_000;
        let pass = tone(10.0, sfreq, n, 1.0);
        let line = tone(60.0, sfreq, n, 1.0);
        let signal: Vec<f64> = pass
            .iter()
            .zip(&line)
            .map(|(a, b)| a + b + 0.7)
            .collect();

        let design = FirDesign::bandpass(sfreq, Some(0.5), Some(40.0)).unwrap();
        let out = apply_zero_phase(&signal, &design.taps).unwrap();
        assert_eq!(out.len(), n);

        // Away from the edges the output is the 10 Hz tone with no shift
        let max_err = (2000..n - 2000)
            .map(|i| (out[i] - pass[i]).abs())
            .fold(0.0, f64::max);
        assert!(max_err < 0.02, "max error {}", max_err);
    }

    #[test]
    fn test_short_signal_keeps_length() {
        let design = FirDesign::bandpass(100.0, Some(1.0), Some(10.0)).unwrap();
        let signal = tone(5.0, 100.0, 50, 1.0);
        assert!(signal.len() < design.len());
        let out = apply_zero_phase(&signal, &design.taps).unwrap();
        assert_eq!(out.len(), 50);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_reflect_limited_pad() {
        let padded = reflect_limited_pad(&[1.0, 2.0, 4.0], 4);
        assert_eq!(
            padded,
            vec![0.0, 0.0, -2.0, 0.0, 1.0, 2.0, 4.0, 6.0, 7.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_filter_recording_updates_info() {
        let info = RecordingInfo::from_labels(250.0, &["Fp1", "Cz", "STI 014"]).unwrap();
        let n = 5000;
        let mut data = Array2::zeros((3, n));
        for (i, v) in tone(60.0, 250.0, n, 1.0).into_iter().enumerate() {
            data[[0, i]] = v;
            data[[1, i]] = v;
            data[[2, i]] = v;
        }
        let mut raw = RawRecording::new(data, info).unwrap();

        raw.filter(Some(1.0), Some(40.0), Some(&[0, 1]), 2).unwrap();

        assert_eq!(raw.info.highpass, 1.0);
        assert_eq!(raw.info.lowpass, 40.0);
        assert_eq!(raw.info.filter_history.len(), 1);
        assert_eq!(raw.info.filter_history[0].channels, vec!["Fp1".to_string(), "Cz".to_string()]);

        let mid = n / 2;
        assert!(raw.data[[0, mid]].abs() < 0.02);
        // Unpicked channel untouched
        assert_eq!(raw.data[[2, mid]], tone(60.0, 250.0, n, 1.0)[mid]);
    }
}
