//! eegclean-core: recordings, metadata and file formats for EEG preprocessing
//!
//! Everything downstream operates on [`RawRecording`], a `channels x samples`
//! matrix in SI units with its [`RecordingInfo`].

pub mod channel;
pub mod edf;
pub mod epochs;
pub mod error;
pub mod info;
pub mod layout;
pub mod recording;

pub use channel::{classify_channel_label, ChannelInfo, ChannelType};
pub use edf::{read_edf, write_edf};
pub use epochs::{Epochs, Event, Evoked};
pub use error::{EegError, EegResult};
pub use info::{FilterRecord, RecordingInfo};
pub use layout::{Layout, SensorPosition};
pub use recording::{ChannelStats, RawRecording};
