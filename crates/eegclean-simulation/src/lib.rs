//! eegclean-simulation: synthetic EEG with eyeblink artifacts
//!
//! Produces recordings with known blink timing for testing the cleaning
//! pipeline and for demonstrating the viewer without a data file.

pub mod blink_patterns;
pub mod eeg_simulator;

pub use blink_patterns::*;
pub use eeg_simulator::*;
