//! eegclean-processing: filtering, ICA and blink removal for EEG recordings
//!
//! The steps of the preprocessing chain live here: a zero-phase FIR
//! bandpass, FastICA decomposition, EOG event detection, component scoring
//! and the [`Pipeline`] that runs them in order.

pub mod artifacts;
pub mod config;
pub mod eog;
pub mod filters;
pub mod ica;
pub mod pipeline;
pub mod processor;

pub use artifacts::{find_outliers, pearson, EogReport, Instance};
pub use config::{EogParams, FilterParams, OutputParams, PipelineConfig, ProcessingProfile};
pub use eog::{
    create_eog_epochs, eog_channel_index, epochs_around_blinks, find_eog_events, peak_finder, EOG_EVENT_ID,
};
pub use filters::{apply_zero_phase, BandpassFilter, FilterExt, FilterType, FirDesign};
pub use ica::{Ica, IcaSettings};
pub use pipeline::{
    ApplyIcaStep, BandpassStep, DetectEogStep, FitIcaStep, MarkBadsStep, Pipeline, PipelineBuilder,
    PipelinePerformance, PipelineResult, SaveStep,
};
pub use processor::{PipelineContext, PreprocessingStep, StepDetails, StepKind, StepMetrics};
