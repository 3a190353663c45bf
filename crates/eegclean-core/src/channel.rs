//! Channel types and label classification

use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard 10-20 / 10-10 electrode labels (lowercase).
pub(crate) const EEG_10_20_LABELS: &[&str] = &[
    "fp1", "fp2", "fpz", "af3", "af4", "af7", "af8", "afz",
    "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "fz",
    "fc1", "fc2", "fc3", "fc4", "fc5", "fc6", "fcz", "ft7", "ft8", "ft9", "ft10",
    "c1", "c2", "c3", "c4", "c5", "c6", "cz", "t3", "t4", "t5", "t6", "t7", "t8",
    "cp1", "cp2", "cp3", "cp4", "cp5", "cp6", "cpz", "tp7", "tp8", "tp9", "tp10",
    "p1", "p2", "p3", "p4", "p5", "p6", "p7", "p8", "p9", "p10", "pz",
    "po3", "po4", "po7", "po8", "poz", "o1", "o2", "oz", "o9", "o10",
    "nz", "iz", "a1", "a2", "m1", "m2",
];

/// Kind of sensor a channel was recorded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    Eeg,
    Eog,
    Ecg,
    Emg,
    Stim,
    Misc,
}

impl ChannelType {
    /// All channel kinds, in display order
    pub const ALL: [ChannelType; 6] = [
        ChannelType::Eeg,
        ChannelType::Eog,
        ChannelType::Ecg,
        ChannelType::Emg,
        ChannelType::Stim,
        ChannelType::Misc,
    ];

    /// Whether samples of this kind are voltages
    pub fn is_voltage(&self) -> bool {
        matches!(self, ChannelType::Eeg | ChannelType::Eog | ChannelType::Ecg | ChannelType::Emg)
    }

    /// Short uppercase tag, also used as EDF label prefix
    pub fn tag(&self) -> &'static str {
        match self {
            ChannelType::Eeg => "EEG",
            ChannelType::Eog => "EOG",
            ChannelType::Ecg => "ECG",
            ChannelType::Emg => "EMG",
            ChannelType::Stim => "STIM",
            ChannelType::Misc => "MISC",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Per-channel metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel label as stored in the file
    pub name: String,
    /// Sensor kind
    pub kind: ChannelType,
    /// Unit of the in-memory samples ("V" for voltage channels)
    pub unit: String,
}

impl ChannelInfo {
    /// Create channel metadata with the unit implied by the kind
    pub fn new(name: impl Into<String>, kind: ChannelType) -> Self {
        let unit = if kind.is_voltage() { "V" } else { "" };
        Self {
            name: name.into(),
            kind,
            unit: unit.to_string(),
        }
    }

    /// Create channel metadata, classifying the kind from the label
    pub fn from_label(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = classify_channel_label(&name);
        Self::new(name, kind)
    }
}

/// Classify a channel label into a channel kind.
///
/// Priority order: explicit type prefix ("EEG 001", "EOG 061"), known
/// non-EEG patterns ("VEOG", "ECG", "STI 014"), 10-20 electrode names, and
/// finally `Misc`.
pub fn classify_channel_label(label: &str) -> ChannelType {
    let lower = label.trim().to_lowercase();
    if lower.is_empty() {
        return ChannelType::Misc;
    }

    let prefixes: &[(&str, ChannelType)] = &[
        ("eeg", ChannelType::Eeg),
        ("eog", ChannelType::Eog),
        ("ecg", ChannelType::Ecg),
        ("ekg", ChannelType::Ecg),
        ("emg", ChannelType::Emg),
        ("stim", ChannelType::Stim),
        ("sti ", ChannelType::Stim),
        ("misc", ChannelType::Misc),
    ];
    for &(prefix, kind) in prefixes {
        if lower.starts_with(prefix) {
            return kind;
        }
    }

    if lower.contains("eog") || lower == "heog" || lower == "veog" {
        return ChannelType::Eog;
    }
    if lower.contains("ecg") || lower.contains("ekg") {
        return ChannelType::Ecg;
    }
    if lower.contains("emg") {
        return ChannelType::Emg;
    }
    if lower.contains("trigger") || lower.contains("status") || lower.starts_with("sti") {
        return ChannelType::Stim;
    }

    if EEG_10_20_LABELS.contains(&lower.as_str()) {
        return ChannelType::Eeg;
    }

    ChannelType::Misc
}

/// Strip a leading type tag such as "EEG " from a label
pub fn strip_type_prefix(label: &str) -> &str {
    let trimmed = label.trim();
    for kind in ChannelType::ALL {
        let tag = kind.tag();
        if let (Some(head), Some(rest)) = (trimmed.get(..tag.len()), trimmed.get(tag.len()..)) {
            if head.eq_ignore_ascii_case(tag) && rest.starts_with(' ') {
                return rest.trim();
            }
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_classification() {
        assert_eq!(classify_channel_label("EEG 001"), ChannelType::Eeg);
        assert_eq!(classify_channel_label("EOG 061"), ChannelType::Eog);
        assert_eq!(classify_channel_label("ECG 063"), ChannelType::Ecg);
        assert_eq!(classify_channel_label("STI 014"), ChannelType::Stim);
    }

    #[test]
    fn test_pattern_and_1020_classification() {
        assert_eq!(classify_channel_label("VEOG"), ChannelType::Eog);
        assert_eq!(classify_channel_label("Fp1"), ChannelType::Eeg);
        assert_eq!(classify_channel_label("Cz"), ChannelType::Eeg);
        assert_eq!(classify_channel_label("Status"), ChannelType::Stim);
        assert_eq!(classify_channel_label("GSR"), ChannelType::Misc);
        assert_eq!(classify_channel_label(""), ChannelType::Misc);
    }

    #[test]
    fn test_channel_info_units() {
        let eeg = ChannelInfo::from_label("Fz");
        assert_eq!(eeg.kind, ChannelType::Eeg);
        assert_eq!(eeg.unit, "V");

        let stim = ChannelInfo::new("STI 014", ChannelType::Stim);
        assert!(stim.unit.is_empty());
    }

    #[test]
    fn test_strip_type_prefix() {
        assert_eq!(strip_type_prefix("EEG Fp1"), "Fp1");
        assert_eq!(strip_type_prefix("eog left"), "left");
        assert_eq!(strip_type_prefix("Cz"), "Cz");
        assert_eq!(strip_type_prefix("EEG"), "EEG");
    }
}
