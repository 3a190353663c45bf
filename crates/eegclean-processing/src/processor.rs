//! Core preprocessing step trait and metrics

use crate::artifacts::EogReport;
use crate::ica::Ica;
use eegclean_core::{EegResult, RawRecording};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// State threaded through the steps of a pipeline
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Working recording, filtered in place
    pub raw: RawRecording,
    /// Reconstruction with excluded components removed
    pub cleaned: Option<RawRecording>,
    /// Fitted decomposition
    pub ica: Option<Ica>,
    /// Blink detection results
    pub eog: Option<EogReport>,
}

impl PipelineContext {
    pub fn new(raw: RawRecording) -> Self {
        Self {
            raw,
            cleaned: None,
            ica: None,
            eog: None,
        }
    }

    /// The cleaned recording when available, otherwise the working one
    pub fn output(&self) -> &RawRecording {
        self.cleaned.as_ref().unwrap_or(&self.raw)
    }
}

/// A single step of the preprocessing chain
pub trait PreprocessingStep: Send + Sync {
    /// Step name used in logs and metrics
    fn name(&self) -> &str;

    /// Run the step, mutating the context
    fn apply(&self, ctx: &mut PipelineContext) -> EegResult<StepDetails>;

    /// Kind of step for grouping in summaries
    fn step_kind(&self) -> StepKind {
        StepKind::Transform
    }
}

/// Categories of preprocessing steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// Metadata edits such as marking bad channels
    Annotation,
    /// Changes the samples
    Transform,
    /// Fits or scores a model without changing samples
    Analysis,
    /// Writes results out
    Output,
}

/// Free-form outcome of a step, for logs and the viewer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepDetails {
    pub summary: String,
    pub warnings: Vec<String>,
}

impl StepDetails {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Performance metrics for one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Step name
    pub step: String,
    /// Wall time in microseconds
    pub processing_time_us: u64,
    /// Success/failure status
    pub success: bool,
    /// Error message if the step failed
    pub error_message: Option<String>,
    /// Step outcome
    pub details: StepDetails,
}

impl StepMetrics {
    pub fn new(step: &str) -> Self {
        Self {
            step: step.to_string(),
            processing_time_us: 0,
            success: true,
            error_message: None,
            details: StepDetails::default(),
        }
    }

    /// Start timing a step
    pub fn start_timing(step: &str) -> ProcessingTimer {
        ProcessingTimer {
            start_time: Instant::now(),
            metrics: StepMetrics::new(step),
        }
    }

    pub fn processing_time_ms(&self) -> f64 {
        self.processing_time_us as f64 / 1000.0
    }
}

/// Helper for timing processing operations
pub struct ProcessingTimer {
    start_time: Instant,
    metrics: StepMetrics,
}

impl ProcessingTimer {
    /// Finish timing and return metrics
    pub fn finish(mut self, details: StepDetails) -> StepMetrics {
        self.metrics.processing_time_us = self.start_time.elapsed().as_micros() as u64;
        self.metrics.details = details;
        self.metrics
    }

    /// Finish with error
    pub fn finish_with_error(mut self, error: &str) -> StepMetrics {
        self.metrics.processing_time_us = self.start_time.elapsed().as_micros() as u64;
        self.metrics.success = false;
        self.metrics.error_message = Some(error.to_string());
        self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eegclean_core::RecordingInfo;
    use ndarray::Array2;
    use std::time::Duration;

    #[test]
    fn test_step_timing() {
        let timer = StepMetrics::start_timing("bandpass");
        std::thread::sleep(Duration::from_millis(1));
        let metrics = timer.finish(StepDetails::new("filtered 3 channels"));

        assert!(metrics.processing_time_us > 0);
        assert!(metrics.success);
        assert_eq!(metrics.step, "bandpass");
        assert_eq!(metrics.details.summary, "filtered 3 channels");
    }

    #[test]
    fn test_timer_error() {
        let metrics = StepMetrics::start_timing("fit_ica").finish_with_error("no data");
        assert!(!metrics.success);
        assert_eq!(metrics.error_message.as_deref(), Some("no data"));
    }

    #[test]
    fn test_context_output_prefers_cleaned() {
        let info = RecordingInfo::from_labels(100.0, &["Cz"]).unwrap();
        let raw = RawRecording::new(Array2::zeros((1, 10)), info).unwrap();
        let mut ctx = PipelineContext::new(raw);
        assert_eq!(ctx.output().id, ctx.raw.id);

        let cleaned = ctx.raw.copy();
        let cleaned_id = cleaned.id;
        ctx.cleaned = Some(cleaned);
        assert_eq!(ctx.output().id, cleaned_id);
    }
}
