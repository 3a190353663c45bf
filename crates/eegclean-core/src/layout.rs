//! Two-dimensional sensor layouts for plotting and spatial weighting
//!
//! Positions are an azimuthal projection of the head: Cz sits at the origin,
//! the nose points along +y, the right ear along +x, and the 10-20
//! circumference (Fpz, T7, Oz, T8) lies on a circle of radius [`HEAD_RADIUS`].

use crate::channel::{strip_type_prefix, ChannelType};
use crate::info::RecordingInfo;
use serde::{Deserialize, Serialize};

/// Radius of the 10-20 circumference in layout units
pub const HEAD_RADIUS: f64 = 0.8;

/// Radius of the ring used for channels without a known position
const OUTER_RING_RADIUS: f64 = 1.05;

// (label, polar angle from Cz in degrees, azimuth in degrees counterclockwise from +x)
const STANDARD_POSITIONS: &[(&str, f64, f64)] = &[
    ("Nz", 112.5, 90.0),
    ("Fp1", 90.0, 108.0),
    ("Fpz", 90.0, 90.0),
    ("Fp2", 90.0, 72.0),
    ("AF7", 90.0, 126.0),
    ("AF3", 74.0, 113.0),
    ("AFz", 67.5, 90.0),
    ("AF4", 74.0, 67.0),
    ("AF8", 90.0, 54.0),
    ("F9", 112.5, 144.0),
    ("F7", 90.0, 144.0),
    ("F5", 75.0, 140.0),
    ("F3", 60.0, 129.0),
    ("F1", 50.0, 113.0),
    ("Fz", 45.0, 90.0),
    ("F2", 50.0, 67.0),
    ("F4", 60.0, 51.0),
    ("F6", 75.0, 40.0),
    ("F8", 90.0, 36.0),
    ("F10", 112.5, 36.0),
    ("FT9", 112.5, 162.0),
    ("FT7", 90.0, 162.0),
    ("FC5", 72.0, 159.0),
    ("FC3", 51.0, 155.0),
    ("FC1", 32.0, 135.0),
    ("FCz", 22.5, 90.0),
    ("FC2", 32.0, 45.0),
    ("FC4", 51.0, 25.0),
    ("FC6", 72.0, 21.0),
    ("FT8", 90.0, 18.0),
    ("FT10", 112.5, 18.0),
    ("A1", 120.0, 180.0),
    ("T7", 90.0, 180.0),
    ("C5", 67.5, 180.0),
    ("C3", 45.0, 180.0),
    ("C1", 22.5, 180.0),
    ("Cz", 0.0, 0.0),
    ("C2", 22.5, 0.0),
    ("C4", 45.0, 0.0),
    ("C6", 67.5, 0.0),
    ("T8", 90.0, 0.0),
    ("A2", 120.0, 0.0),
    ("TP9", 112.5, 198.0),
    ("TP7", 90.0, 198.0),
    ("CP5", 72.0, 201.0),
    ("CP3", 51.0, 205.0),
    ("CP1", 32.0, 225.0),
    ("CPz", 22.5, 270.0),
    ("CP2", 32.0, 315.0),
    ("CP4", 51.0, 335.0),
    ("CP6", 72.0, 339.0),
    ("TP8", 90.0, 342.0),
    ("TP10", 112.5, 342.0),
    ("P9", 112.5, 216.0),
    ("P7", 90.0, 216.0),
    ("P5", 75.0, 220.0),
    ("P3", 60.0, 231.0),
    ("P1", 50.0, 247.0),
    ("Pz", 45.0, 270.0),
    ("P2", 50.0, 293.0),
    ("P4", 60.0, 309.0),
    ("P6", 75.0, 320.0),
    ("P8", 90.0, 324.0),
    ("P10", 112.5, 324.0),
    ("PO7", 90.0, 234.0),
    ("PO3", 74.0, 247.0),
    ("POz", 67.5, 270.0),
    ("PO4", 74.0, 293.0),
    ("PO8", 90.0, 306.0),
    ("O9", 112.5, 252.0),
    ("O1", 90.0, 252.0),
    ("Oz", 90.0, 270.0),
    ("O2", 90.0, 288.0),
    ("O10", 112.5, 288.0),
    ("Iz", 112.5, 270.0),
];

// Old 10-20 names
const ALIASES: &[(&str, &str)] = &[
    ("T3", "T7"),
    ("T4", "T8"),
    ("T5", "P7"),
    ("T6", "P8"),
    ("M1", "A1"),
    ("M2", "A2"),
];

/// A named sensor position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPosition {
    pub name: String,
    pub x: f64,
    pub y: f64,
    /// False when the label had no known position and was placed on the outer ring
    pub known: bool,
}

impl SensorPosition {
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        ((self.x - x).powi(2) + (self.y - y).powi(2)).sqrt()
    }
}

/// Ordered set of sensor positions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub name: String,
    pub positions: Vec<SensorPosition>,
}

impl Layout {
    /// Every electrode of the 10-20/10-10 set
    pub fn standard_1020() -> Self {
        let positions = STANDARD_POSITIONS
            .iter()
            .map(|&(name, theta, phi)| {
                let (x, y) = project(theta, phi);
                SensorPosition {
                    name: name.to_string(),
                    x,
                    y,
                    known: true,
                }
            })
            .collect();
        Layout {
            name: "standard_1020".to_string(),
            positions,
        }
    }

    /// Positions for the recording's EEG and EOG channels, in channel order.
    ///
    /// Labels are matched case-insensitively after stripping a type prefix such
    /// as "EEG ". Unmatched channels are spread evenly on a ring outside the head.
    pub fn for_info(info: &RecordingInfo) -> Self {
        let channels: Vec<&str> = info
            .channels
            .iter()
            .filter(|c| matches!(c.kind, ChannelType::Eeg | ChannelType::Eog))
            .map(|c| c.name.as_str())
            .collect();

        let mut positions: Vec<SensorPosition> = channels
            .iter()
            .map(|&name| match lookup(strip_type_prefix(name)) {
                Some((x, y)) => SensorPosition {
                    name: name.to_string(),
                    x,
                    y,
                    known: true,
                },
                None => SensorPosition {
                    name: name.to_string(),
                    x: 0.0,
                    y: 0.0,
                    known: false,
                },
            })
            .collect();

        let n_unknown = positions.iter().filter(|p| !p.known).count();
        for (k, pos) in positions.iter_mut().filter(|p| !p.known).enumerate() {
            // Start at the front and go clockwise
            let angle = std::f64::consts::FRAC_PI_2 - 2.0 * std::f64::consts::PI * k as f64 / n_unknown as f64;
            pos.x = OUTER_RING_RADIUS * angle.cos();
            pos.y = OUTER_RING_RADIUS * angle.sin();
        }

        Layout {
            name: "recording".to_string(),
            positions,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Position of a sensor by exact name
    pub fn position(&self, name: &str) -> Option<&SensorPosition> {
        self.positions.iter().find(|p| p.name == name)
    }
}

/// Known projected position of a 10-20 label, if any
pub fn lookup(label: &str) -> Option<(f64, f64)> {
    let label = ALIASES
        .iter()
        .find(|(old, _)| old.eq_ignore_ascii_case(label))
        .map(|(_, new)| *new)
        .unwrap_or(label);

    STANDARD_POSITIONS
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(label))
        .map(|&(_, theta, phi)| project(theta, phi))
}

fn project(theta_deg: f64, phi_deg: f64) -> (f64, f64) {
    let r = HEAD_RADIUS * theta_deg / 90.0;
    let phi = phi_deg.to_radians();
    (r * phi.cos(), r * phi.sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_layout_geometry() {
        let layout = Layout::standard_1020();
        let cz = layout.position("Cz").unwrap();
        assert!(cz.x.abs() < 1e-12 && cz.y.abs() < 1e-12);

        let fpz = layout.position("Fpz").unwrap();
        assert!(fpz.x.abs() < 1e-9);
        assert!((fpz.y - HEAD_RADIUS).abs() < 1e-9);

        let t7 = layout.position("T7").unwrap();
        assert!((t7.x + HEAD_RADIUS).abs() < 1e-9);

        // Left hemisphere is negative x, frontal is positive y
        let fp1 = layout.position("Fp1").unwrap();
        assert!(fp1.x < 0.0 && fp1.y > 0.0);
    }

    #[test]
    fn test_aliases_and_case() {
        assert_eq!(lookup("T3"), lookup("T7"));
        assert_eq!(lookup("fp1"), lookup("Fp1"));
        assert!(lookup("EOG061").is_none());
    }

    #[test]
    fn test_for_info() {
        let info =
            RecordingInfo::from_labels(100.0, &["EEG Fp1", "Cz", "EOG 061", "STI 014", "EEG 053"]).unwrap();
        let layout = Layout::for_info(&info);

        assert_eq!(layout.len(), 4);
        assert!(layout.position("EEG Fp1").unwrap().known);
        assert!(layout.position("STI 014").is_none());

        let eog = layout.position("EOG 061").unwrap();
        assert!(!eog.known);
        let r = (eog.x.powi(2) + eog.y.powi(2)).sqrt();
        assert!((r - OUTER_RING_RADIUS).abs() < 1e-9);
    }
}
