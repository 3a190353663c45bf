//! Preprocessing pipeline chaining the steps from bad-channel marking to output

use crate::artifacts::EogReport;
use crate::config::PipelineConfig;
use crate::eog::{epochs_around_blinks, find_eog_events, resolve_eog_channel, EOG_H_FREQ, EOG_L_FREQ};
use crate::filters::FilterExt;
use crate::ica::{Ica, IcaSettings};
use crate::processor::{PipelineContext, PreprocessingStep, StepDetails, StepKind, StepMetrics};
use eegclean_core::{ChannelType, EegError, EegResult, RawRecording};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};

/// Add channels to the bad set.
///
/// Names missing from the recording are reported as warnings.
#[derive(Debug, Clone)]
pub struct MarkBadsStep {
    pub bads: Vec<String>,
}

impl PreprocessingStep for MarkBadsStep {
    fn name(&self) -> &str {
        "mark_bads"
    }

    fn apply(&self, ctx: &mut PipelineContext) -> EegResult<StepDetails> {
        let (present, missing): (Vec<&String>, Vec<&String>) =
            self.bads.iter().partition(|name| ctx.raw.channel_index(name).is_ok());

        ctx.raw.mark_bads(&present)?;
        let mut details = StepDetails::new(format!("bads: {:?}", ctx.raw.info.bads));
        for name in missing {
            warn!("Bad channel {} not in recording", name);
            details = details.with_warning(format!("channel {} not found, not marked", name));
        }
        Ok(details)
    }

    fn step_kind(&self) -> StepKind {
        StepKind::Annotation
    }
}

/// Zero-phase bandpass of the selected channel kinds, in place
#[derive(Debug, Clone)]
pub struct BandpassStep {
    pub l_freq: Option<f64>,
    pub h_freq: Option<f64>,
    pub channel_types: Vec<ChannelType>,
    pub n_jobs: usize,
}

impl PreprocessingStep for BandpassStep {
    fn name(&self) -> &str {
        "bandpass"
    }

    fn apply(&self, ctx: &mut PipelineContext) -> EegResult<StepDetails> {
        let picks = ctx.raw.picks_by_type(&self.channel_types, false);
        if picks.is_empty() {
            return Err(EegError::ProcessingError {
                message: format!("No channels of kinds {:?} to filter", self.channel_types),
            });
        }
        ctx.raw.filter(self.l_freq, self.h_freq, Some(&picks), self.n_jobs)?;
        Ok(StepDetails::new(format!(
            "{} channels filtered to {:?}-{:?} Hz",
            picks.len(),
            self.l_freq,
            self.h_freq
        )))
    }
}

/// Fit ICA on the good EEG channels of the working recording
#[derive(Debug, Clone)]
pub struct FitIcaStep {
    pub settings: IcaSettings,
}

impl PreprocessingStep for FitIcaStep {
    fn name(&self) -> &str {
        "fit_ica"
    }

    fn apply(&self, ctx: &mut PipelineContext) -> EegResult<StepDetails> {
        let ica = Ica::fit(&ctx.raw, None, &self.settings)?;
        let details = StepDetails::new(format!(
            "{} components on {} channels from {} samples",
            ica.n_components(),
            ica.ch_names.len(),
            ica.n_samples_fit
        ));
        ctx.ica = Some(ica);
        Ok(details)
    }

    fn step_kind(&self) -> StepKind {
        StepKind::Analysis
    }
}

/// Find blink events and the components correlated with them
#[derive(Debug, Clone)]
pub struct DetectEogStep {
    pub ch_name: Option<String>,
    pub threshold: f64,
    pub tmin: f64,
    pub tmax: f64,
    pub baseline: Option<(f64, f64)>,
    /// Peak-to-peak limit for keeping a blink epoch
    pub reject: Option<f64>,
}

impl PreprocessingStep for DetectEogStep {
    fn name(&self) -> &str {
        "detect_eog"
    }

    fn apply(&self, ctx: &mut PipelineContext) -> EegResult<StepDetails> {
        let ch_name = self.ch_name.as_deref();
        let ica = ctx.ica.as_mut().ok_or_else(|| EegError::ProcessingError {
            message: "EOG detection needs a fitted ICA".to_string(),
        })?;
        let channel = ctx.raw.info.channels[resolve_eog_channel(&ctx.raw, ch_name)?].name.clone();

        // Components are scored on the same blink epochs that are averaged
        let events = find_eog_events(&ctx.raw, ch_name, EOG_L_FREQ, EOG_H_FREQ)?;
        let mut warnings = Vec::new();
        let epochs = match epochs_around_blinks(
            &ctx.raw,
            ch_name,
            &events,
            self.tmin,
            self.tmax,
            None,
            self.baseline,
            self.reject,
        ) {
            Ok(epochs) if !epochs.is_empty() => Some(epochs),
            Ok(epochs) => {
                warnings.push(format!(
                    "all {} EOG epochs were dropped, scoring on the continuous recording",
                    epochs.n_dropped
                ));
                None
            }
            Err(EegError::NoEvents { channel }) => {
                warnings.push(format!(
                    "no blinks found on {}, scoring on the continuous recording",
                    channel
                ));
                None
            }
            Err(e) => return Err(e),
        };

        let (evoked, (indices, scores)) = match &epochs {
            Some(epochs) => (
                Some(epochs.average()?),
                ica.find_bads_eog(epochs, ch_name, self.threshold)?,
            ),
            None => (None, ica.find_bads_eog(&ctx.raw, ch_name, self.threshold)?),
        };

        let mut details = StepDetails::new(format!(
            "{} blink(s) on {}, EOG components {:?}",
            events.len(),
            channel,
            indices
        ));
        if indices.is_empty() {
            warnings.push("no component exceeded the EOG threshold".to_string());
        }
        for w in warnings {
            warn!("{}", w);
            details = details.with_warning(w);
        }

        ctx.eog = Some(EogReport {
            channel,
            events,
            evoked,
            indices,
            scores,
        });
        Ok(details)
    }

    fn step_kind(&self) -> StepKind {
        StepKind::Analysis
    }
}

/// Exclude the EOG components and reconstruct into a copy of the recording
#[derive(Debug, Clone, Default)]
pub struct ApplyIcaStep;

impl PreprocessingStep for ApplyIcaStep {
    fn name(&self) -> &str {
        "apply_ica"
    }

    fn apply(&self, ctx: &mut PipelineContext) -> EegResult<StepDetails> {
        let ica = ctx.ica.as_mut().ok_or_else(|| EegError::ProcessingError {
            message: "Nothing to apply: ICA was not fitted".to_string(),
        })?;
        if let Some(report) = &ctx.eog {
            ica.exclude = report.indices.clone();
        }

        let mut cleaned = ctx.raw.copy();
        ica.apply(&mut cleaned)?;
        let details = StepDetails::new(format!("excluded components {:?}", ica.exclude));
        ctx.cleaned = Some(cleaned);
        Ok(details)
    }
}

/// Write the cleaned recording, and the fitted ICA when a path is given
#[derive(Debug, Clone)]
pub struct SaveStep {
    pub path: PathBuf,
    pub ica_path: Option<PathBuf>,
}

impl PreprocessingStep for SaveStep {
    fn name(&self) -> &str {
        "save"
    }

    fn apply(&self, ctx: &mut PipelineContext) -> EegResult<StepDetails> {
        ctx.output().write_edf(&self.path)?;
        let mut summary = format!("wrote {}", self.path.display());

        if let Some(ica_path) = &self.ica_path {
            let ica = ctx.ica.as_ref().ok_or_else(|| EegError::ProcessingError {
                message: "No fitted ICA to save".to_string(),
            })?;
            ica.save(ica_path)?;
            summary.push_str(&format!(" and {}", ica_path.display()));
        }
        Ok(StepDetails::new(summary))
    }

    fn step_kind(&self) -> StepKind {
        StepKind::Output
    }
}

/// Ordered list of preprocessing steps
pub struct Pipeline {
    name: String,
    steps: Vec<Box<dyn PreprocessingStep>>,
    processing_metrics: Vec<StepMetrics>,
}

/// Builder for custom step chains
pub struct PipelineBuilder {
    name: String,
    steps: Vec<Box<dyn PreprocessingStep>>,
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub context: PipelineContext,
    pub processing_metrics: Vec<StepMetrics>,
    pub total_time_us: u64,
    pub warnings: Vec<String>,
}

/// Aggregate timing over the last run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelinePerformance {
    pub total_time_us: u64,
    pub step_count: usize,
    pub success_rate: f32,
    /// Name of the slowest step
    pub slowest_step: Option<String>,
}

impl Pipeline {
    /// Create new empty pipeline
    pub fn new(name: &str) -> Self {
        Pipeline {
            name: name.to_string(),
            steps: Vec::new(),
            processing_metrics: Vec::new(),
        }
    }

    /// The standard chain for a configuration.
    ///
    /// The save step is included only when `config.output.path` is set.
    pub fn from_config(config: &PipelineConfig) -> EegResult<Self> {
        config.validate()?;

        let mut builder = PipelineBuilder::new(&config.name);
        builder
            .add_step(Box::new(MarkBadsStep {
                bads: config.bads.clone(),
            }))
            .add_step(Box::new(BandpassStep {
                l_freq: config.filter.l_freq,
                h_freq: config.filter.h_freq,
                channel_types: config.filter.channel_types.clone(),
                n_jobs: config.filter.n_jobs,
            }))
            .add_step(Box::new(FitIcaStep {
                settings: config.ica.clone(),
            }))
            .add_step(Box::new(DetectEogStep {
                ch_name: config.eog.ch_name.clone(),
                threshold: config.eog.threshold,
                tmin: config.eog.tmin,
                tmax: config.eog.tmax,
                baseline: config.eog.baseline,
                reject: config.eog.reject,
            }))
            .add_step(Box::new(ApplyIcaStep));

        if let Some(path) = &config.output.path {
            builder.add_step(Box::new(SaveStep {
                path: path.clone(),
                ica_path: config.output.ica_path.clone(),
            }));
        }

        Ok(builder.build())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add step to pipeline
    pub fn add_step(&mut self, step: Box<dyn PreprocessingStep>) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Get list of all step names
    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    /// Step kinds in execution order
    pub fn step_kinds(&self) -> Vec<StepKind> {
        self.steps.iter().map(|s| s.step_kind()).collect()
    }

    /// Run every step over `raw` in order.
    ///
    /// The first failing step aborts the run; its metrics are kept and can be
    /// read back with [`Pipeline::last_metrics`].
    pub fn run(&mut self, raw: RawRecording) -> EegResult<PipelineResult> {
        let start_time = Instant::now();
        let mut ctx = PipelineContext::new(raw);
        let mut all_metrics = Vec::with_capacity(self.steps.len());
        let mut warnings = Vec::new();

        info!("Running pipeline '{}' ({} steps)", self.name, self.steps.len());

        for step in &self.steps {
            let timer = StepMetrics::start_timing(step.name());
            match step.apply(&mut ctx) {
                Ok(details) => {
                    warnings.extend(details.warnings.iter().map(|w| format!("{}: {}", step.name(), w)));
                    let metrics = timer.finish(details);
                    info!(
                        "Step '{}' done in {:.1} ms: {}",
                        metrics.step,
                        metrics.processing_time_ms(),
                        metrics.details.summary
                    );
                    all_metrics.push(metrics);
                }
                Err(e) => {
                    error!("Step '{}' failed: {}", step.name(), e);
                    all_metrics.push(timer.finish_with_error(&e.to_string()));
                    self.processing_metrics = all_metrics;
                    return Err(e);
                }
            }
        }

        let total_time_us = start_time.elapsed().as_micros() as u64;
        self.processing_metrics = all_metrics.clone();

        Ok(PipelineResult {
            context: ctx,
            processing_metrics: all_metrics,
            total_time_us,
            warnings,
        })
    }

    /// Metrics of the most recent run
    pub fn last_metrics(&self) -> &[StepMetrics] {
        &self.processing_metrics
    }

    /// Get pipeline performance summary
    pub fn performance_summary(&self) -> PipelinePerformance {
        let total_time_us = self.processing_metrics.iter().map(|m| m.processing_time_us).sum();

        let success_rate = if self.processing_metrics.is_empty() {
            1.0
        } else {
            let successful = self.processing_metrics.iter().filter(|m| m.success).count();
            successful as f32 / self.processing_metrics.len() as f32
        };

        PipelinePerformance {
            total_time_us,
            step_count: self.steps.len(),
            success_rate,
            slowest_step: self
                .processing_metrics
                .iter()
                .max_by_key(|m| m.processing_time_us)
                .map(|m| m.step.clone()),
        }
    }
}

impl PipelineBuilder {
    /// Create new pipeline builder
    pub fn new(name: &str) -> Self {
        PipelineBuilder {
            name: name.to_string(),
            steps: Vec::new(),
        }
    }

    /// Add any step to the pipeline
    pub fn add_step(&mut self, step: Box<dyn PreprocessingStep>) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Add bad-channel marking
    pub fn mark_bads<S: AsRef<str>>(&mut self, bads: &[S]) -> &mut Self {
        self.add_step(Box::new(MarkBadsStep {
            bads: bads.iter().map(|s| s.as_ref().to_string()).collect(),
        }))
    }

    /// Add a bandpass over EEG and EOG channels
    pub fn bandpass(&mut self, l_freq: Option<f64>, h_freq: Option<f64>) -> &mut Self {
        self.add_step(Box::new(BandpassStep {
            l_freq,
            h_freq,
            channel_types: vec![ChannelType::Eeg, ChannelType::Eog],
            n_jobs: 1,
        }))
    }

    /// Build the pipeline
    pub fn build(self) -> Pipeline {
        let mut pipeline = Pipeline::new(&self.name);
        for step in self.steps {
            pipeline.add_step(step);
        }
        pipeline
    }
}

impl PipelineResult {
    /// The cleaned recording, or the filtered one when ICA was not applied
    pub fn output(&self) -> &RawRecording {
        self.context.output()
    }

    /// One line per step with timing
    pub fn summary(&self) -> String {
        let mut lines: Vec<String> = self
            .processing_metrics
            .iter()
            .map(|m| format!("{:<12} {:>9.1} ms  {}", m.step, m.processing_time_ms(), m.details.summary))
            .collect();
        lines.push(format!("{:<12} {:>9.1} ms", "total", self.total_time_us as f64 / 1000.0));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eegclean_core::RecordingInfo;
    use ndarray::Array2;
    use std::f64::consts::PI;

    fn small_recording() -> RawRecording {
        let info = RecordingInfo::from_labels(100.0, &["Fp1", "Fp2", "Cz", "EOG 061"]).unwrap();
        let data = Array2::from_shape_fn((4, 2000), |(ch, i)| {
            let t = i as f64 / 100.0;
            1e-5 * (2.0 * PI * (5.0 + ch as f64) * t).sin()
        });
        RawRecording::new(data, info).unwrap()
    }

    struct Scale(f64);

    impl PreprocessingStep for Scale {
        fn name(&self) -> &str {
            "scale"
        }

        fn apply(&self, ctx: &mut PipelineContext) -> EegResult<StepDetails> {
            ctx.raw.data *= self.0;
            Ok(StepDetails::new("scaled"))
        }
    }

    #[test]
    fn test_pipeline_builder() {
        let mut builder = PipelineBuilder::new("Test Pipeline");
        builder.mark_bads(&["Fp2"]).bandpass(Some(1.0), Some(30.0));
        let pipeline = builder.build();

        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.name(), "Test Pipeline");
        assert_eq!(pipeline.step_names(), vec!["mark_bads", "bandpass"]);
        assert_eq!(pipeline.step_kinds(), vec![StepKind::Annotation, StepKind::Transform]);
    }

    #[test]
    fn test_run_records_metrics() {
        let mut builder = PipelineBuilder::new("scaling");
        builder.add_step(Box::new(Scale(2.0))).mark_bads(&["Fp1", "EEG 053"]);
        let mut pipeline = builder.build();

        let raw = small_recording();
        let expected = raw.data[[0, 10]] * 2.0;
        let result = pipeline.run(raw).unwrap();

        assert_eq!(result.processing_metrics.len(), 2);
        assert!(result.processing_metrics.iter().all(|m| m.success));
        assert_eq!(result.output().data[[0, 10]], expected);
        assert!(result.output().info.is_bad("Fp1"));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("EEG 053"));
        assert!(result.summary().contains("total"));

        let perf = pipeline.performance_summary();
        assert_eq!(perf.step_count, 2);
        assert_eq!(perf.success_rate, 1.0);
    }

    #[test]
    fn test_step_order_is_enforced() {
        let mut pipeline = Pipeline::new("out of order");
        pipeline.add_step(Box::new(ApplyIcaStep));
        pipeline.add_step(Box::new(Scale(3.0)));

        let err = pipeline.run(small_recording()).unwrap_err();
        assert!(matches!(err, EegError::ProcessingError { .. }));

        let metrics = pipeline.last_metrics();
        assert_eq!(metrics.len(), 1);
        assert!(!metrics[0].success);
        assert_eq!(pipeline.performance_summary().success_rate, 0.0);
    }

    #[test]
    fn test_bandpass_step_updates_info() {
        let mut pipeline = Pipeline::new("filter");
        pipeline.add_step(Box::new(BandpassStep {
            l_freq: Some(1.0),
            h_freq: Some(20.0),
            channel_types: vec![ChannelType::Eeg],
            n_jobs: 2,
        }));
        let result = pipeline.run(small_recording()).unwrap();
        assert_eq!(result.output().info.highpass, 1.0);
        assert_eq!(result.output().info.lowpass, 20.0);
        assert!(result.context.cleaned.is_none());
    }

    #[test]
    fn test_from_config_steps() {
        let mut config = PipelineConfig::standard();
        let pipeline = Pipeline::from_config(&config).unwrap();
        assert_eq!(
            pipeline.step_names(),
            vec!["mark_bads", "bandpass", "fit_ica", "detect_eog", "apply_ica"]
        );

        config.output.path = Some(PathBuf::from("out.edf"));
        let pipeline = Pipeline::from_config(&config).unwrap();
        assert_eq!(pipeline.step_names().last().map(String::as_str), Some("save"));

        config.ica.decim = 0;
        assert!(Pipeline::from_config(&config).is_err());
    }
}
