//! Eyeblink event detection on an EOG reference channel

use crate::filters::{apply_zero_phase, FirDesign};
use eegclean_core::{ChannelType, EegError, EegResult, Epochs, Event, RawRecording, RecordingInfo};
use tracing::{debug, info};

/// Event id assigned to detected blinks
pub const EOG_EVENT_ID: i32 = 998;

/// Band used to isolate blinks on the reference channel
pub const EOG_L_FREQ: f64 = 1.0;
pub const EOG_H_FREQ: f64 = 10.0;

/// Reference channel in `info`: the named one, or the first EOG channel
pub fn eog_channel_index(info: &RecordingInfo, ch_name: Option<&str>) -> EegResult<usize> {
    match ch_name {
        Some(name) => info.channel_index(name),
        None => {
            let eog = info.picks_by_type(&[ChannelType::Eog], false);
            eog.first().copied().ok_or_else(|| EegError::ChannelNotFound {
                name: "EOG".to_string(),
            })
        }
    }
}

/// Resolve the reference channel of a recording
pub fn resolve_eog_channel(raw: &RawRecording, ch_name: Option<&str>) -> EegResult<usize> {
    eog_channel_index(&raw.info, ch_name)
}

/// Detect blinks on the reference channel.
///
/// The channel is bandpassed to `[l_freq, h_freq]`, mean-removed and flipped
/// so that blinks point upwards. Peaks are found with a hysteresis of a
/// quarter of the filtered range.
pub fn find_eog_events(
    raw: &RawRecording,
    ch_name: Option<&str>,
    l_freq: f64,
    h_freq: f64,
) -> EegResult<Vec<Event>> {
    let idx = resolve_eog_channel(raw, ch_name)?;
    let name = &raw.info.channels[idx].name;

    let design = FirDesign::bandpass(raw.sfreq(), Some(l_freq), Some(h_freq))?;
    let signal = raw.channel_data(idx)?.to_vec();
    let mut filtered = apply_zero_phase(&signal, &design.taps)?;

    let mean = filtered.iter().sum::<f64>() / filtered.len().max(1) as f64;
    filtered.iter_mut().for_each(|x| *x -= mean);

    let max = filtered.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = filtered.iter().copied().fold(f64::INFINITY, f64::min);
    if min.abs() > max.abs() {
        filtered.iter_mut().for_each(|x| *x = -*x);
    }

    let thresh = (max - min) / 4.0;
    let peaks = peak_finder(&filtered, thresh);

    info!("Found {} EOG event(s) on {}", peaks.len(), name);
    debug!("EOG threshold {:e}, peaks {:?}", thresh, peaks);

    Ok(peaks.into_iter().map(|s| Event::new(s, EOG_EVENT_ID)).collect())
}

/// Local maxima separated by drops of at least `thresh`.
///
/// Starts looking for a trough; a rise of `thresh` above the running minimum
/// starts a peak, and a fall of `thresh` below the running maximum confirms
/// it. A peak still open at the end of the signal is not reported.
pub fn peak_finder(x: &[f64], thresh: f64) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.is_empty() || !(thresh > 0.0) {
        return peaks;
    }

    let mut in_peak = false;
    let mut cur_min = x[0];
    let mut cur_max = x[0];
    let mut max_idx = 0;

    for (i, &v) in x.iter().enumerate() {
        if in_peak {
            if v > cur_max {
                cur_max = v;
                max_idx = i;
            } else if v < cur_max - thresh {
                peaks.push(max_idx);
                in_peak = false;
                cur_min = v;
            }
        } else if v < cur_min {
            cur_min = v;
        } else if v > cur_min + thresh {
            in_peak = true;
            cur_max = v;
            max_idx = i;
        }
    }

    peaks
}

/// Epochs around detected blinks.
///
/// Returns [`EegError::NoEvents`] when the reference channel shows no blinks.
pub fn create_eog_epochs(
    raw: &RawRecording,
    ch_name: Option<&str>,
    tmin: f64,
    tmax: f64,
    picks: Option<&[usize]>,
    baseline: Option<(f64, f64)>,
    reject: Option<f64>,
) -> EegResult<Epochs> {
    let events = find_eog_events(raw, ch_name, EOG_L_FREQ, EOG_H_FREQ)?;
    epochs_around_blinks(raw, ch_name, &events, tmin, tmax, picks, baseline, reject)
}

/// Epochs around blinks already found by [`find_eog_events`].
///
/// Returns [`EegError::NoEvents`] when `events` is empty.
#[allow(clippy::too_many_arguments)]
pub fn epochs_around_blinks(
    raw: &RawRecording,
    ch_name: Option<&str>,
    events: &[Event],
    tmin: f64,
    tmax: f64,
    picks: Option<&[usize]>,
    baseline: Option<(f64, f64)>,
    reject: Option<f64>,
) -> EegResult<Epochs> {
    if events.is_empty() {
        let idx = resolve_eog_channel(raw, ch_name)?;
        return Err(EegError::NoEvents {
            channel: raw.info.channels[idx].name.clone(),
        });
    }
    let epochs = Epochs::from_raw(raw, events, tmin, tmax, picks, baseline, reject)?;
    debug!("{} EOG epochs kept, {} dropped", epochs.n_epochs(), epochs.n_dropped);
    Ok(epochs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::f64::consts::PI;

    const SFREQ: f64 = 250.0;

    /// Gaussian blinks of `amplitude` on the EOG row at the given samples
    fn blink_recording(blinks: &[usize], amplitude: f64) -> RawRecording {
        let info = RecordingInfo::from_labels(SFREQ, &["Fp1", "Cz", "EOG 061"]).unwrap();
        let n = 5000;
        let sigma = 0.05 * SFREQ;
        let data = Array2::from_shape_fn((3, n), |(ch, i)| {
            let t = i as f64 / SFREQ;
            let background = 5e-6 * (2.0 * PI * 10.0 * t).sin() + 2e-6 * (2.0 * PI * 23.0 * t).sin();
            if ch == 2 {
                let blink: f64 = blinks
                    .iter()
                    .map(|&b| {
                        let d = (i as f64 - b as f64) / sigma;
                        amplitude * (-0.5 * d * d).exp()
                    })
                    .sum();
                background + blink
            } else {
                background
            }
        });
        RawRecording::new(data, info).unwrap()
    }

    #[test]
    fn test_peak_finder_hysteresis() {
        let x = [0.0, 1.0, 0.2, 0.9, 0.1, 0.0, 3.0, 2.5, 0.0, 0.5, 4.0, 0.0];
        assert_eq!(peak_finder(&x, 2.0), vec![6, 10]);
        assert!(peak_finder(&x, 10.0).is_empty());
        assert!(peak_finder(&[], 1.0).is_empty());
    }

    #[test]
    fn test_peak_finder_open_peak_not_reported() {
        let x = [0.0, 0.0, 5.0, 6.0];
        assert!(peak_finder(&x, 2.0).is_empty());
    }

    #[test]
    fn test_find_eog_events_recovers_blinks() {
        let blinks = [600, 1400, 2300, 3100, 4200];
        let raw = blink_recording(&blinks, 150e-6);
        let events = find_eog_events(&raw, Some("EOG 061"), EOG_L_FREQ, EOG_H_FREQ).unwrap();

        assert_eq!(events.len(), blinks.len());
        for (event, &truth) in events.iter().zip(blinks.iter()) {
            assert_eq!(event.id, EOG_EVENT_ID);
            assert!((event.sample as i64 - truth as i64).abs() <= 10, "{} vs {}", event.sample, truth);
        }
    }

    #[test]
    fn test_negative_blinks_are_flipped() {
        let blinks = [1000, 2500, 4000];
        let raw = blink_recording(&blinks, -150e-6);
        let events = find_eog_events(&raw, None, EOG_L_FREQ, EOG_H_FREQ).unwrap();
        assert_eq!(events.len(), 3);
        assert!((events[1].sample as i64 - 2500).abs() <= 10);
    }

    #[test]
    fn test_unknown_channel() {
        let raw = blink_recording(&[1000], 150e-6);
        let err = find_eog_events(&raw, Some("EOG 999"), EOG_L_FREQ, EOG_H_FREQ).unwrap_err();
        assert!(matches!(err, EegError::ChannelNotFound { .. }));
    }

    #[test]
    fn test_create_eog_epochs() {
        let blinks = [600, 1400, 2300, 3100, 4200];
        let raw = blink_recording(&blinks, 150e-6);
        let epochs = create_eog_epochs(&raw, Some("EOG 061"), -0.5, 0.5, None, None, None).unwrap();

        assert_eq!(epochs.n_epochs(), 5);
        assert_eq!(epochs.n_times(), 251);

        let evoked = epochs.average().unwrap();
        let (ch, _) = evoked.peak().unwrap();
        assert_eq!(evoked.info.channels[ch].name, "EOG 061");
    }

    #[test]
    fn test_eog_channel_index_on_picked_info() {
        let raw = blink_recording(&[1000], 150e-6);
        assert_eq!(eog_channel_index(&raw.info, None).unwrap(), 2);
        assert_eq!(eog_channel_index(&raw.info, Some("Cz")).unwrap(), 1);

        // Epochs carry a picked copy of the info, so the index follows the pick
        let picked = raw.info.pick(&[2, 0]).unwrap();
        assert_eq!(eog_channel_index(&picked, None).unwrap(), 0);

        let eeg_only = raw.info.pick(&[0, 1]).unwrap();
        assert!(matches!(
            eog_channel_index(&eeg_only, None),
            Err(EegError::ChannelNotFound { .. })
        ));
    }

    #[test]
    fn test_epochs_around_blinks_without_events() {
        let raw = blink_recording(&[1000], 150e-6);
        let err = epochs_around_blinks(&raw, None, &[], -0.5, 0.5, None, None, None).unwrap_err();
        assert!(matches!(err, EegError::NoEvents { channel } if channel == "EOG 061"));
    }
}
