//! Basic usage of eegclean-core
//!
//! Builds a small recording in memory, inspects it, cuts epochs around
//! synthetic events and round-trips it through EDF.

use eegclean_core::{ChannelType, EegResult, Epochs, Event, Layout, RawRecording, RecordingInfo};
use ndarray::Array2;

fn main() -> EegResult<()> {
    println!("=== eegclean-core basic usage ===\n");

    let raw = build_recording()?;
    inspect_recording(&raw)?;
    epoch_example(&raw)?;
    edf_example(&raw)?;

    println!("=== Done ===");
    Ok(())
}

fn build_recording() -> EegResult<RawRecording> {
    println!("1. Building a 4-channel recording at 250 Hz");
    let labels = ["Fp1", "Fp2", "Oz", "EOG 061"];
    let info = RecordingInfo::from_labels(250.0, &labels)?;

    let data = Array2::from_shape_fn((4, 2500), |(ch, i)| {
        let t = i as f64 / 250.0;
        let alpha = 10e-6 * (2.0 * std::f64::consts::PI * 10.0 * t).sin();
        // A blink every two seconds on the frontal and EOG channels
        let blink = if ch != 2 && (i % 500) < 50 { 100e-6 } else { 0.0 };
        alpha + blink
    });

    let mut raw = RawRecording::new(data, info)?;
    raw.mark_bads(&["Fp2"])?;
    println!("   {}\n", raw.info.summary());
    Ok(raw)
}

fn inspect_recording(raw: &RawRecording) -> EegResult<()> {
    println!("2. Channel statistics");
    for idx in 0..raw.n_channels() {
        let stats = raw.channel_stats(idx)?;
        println!(
            "   {:8} mean {:+.2e} V, ptp {:.2e} V",
            raw.info.channels[idx].name, stats.mean, stats.peak_to_peak
        );
    }

    let good_eeg = raw.picks_by_type(&[ChannelType::Eeg], true);
    println!("   good EEG picks: {:?}", good_eeg);

    let layout = Layout::for_info(&raw.info);
    for pos in &layout.positions {
        println!("   {:8} at ({:+.2}, {:+.2})", pos.name, pos.x, pos.y);
    }
    println!();
    Ok(())
}

fn epoch_example(raw: &RawRecording) -> EegResult<()> {
    println!("3. Epoching around blinks");
    let events: Vec<Event> = (1..5).map(|k| Event::new(k * 500 + 25, 998)).collect();
    let epochs = Epochs::from_raw(raw, &events, -0.5, 0.5, None, None, None)?;
    let evoked = epochs.average()?;
    println!(
        "   {} epochs of {} samples, peak at {:?}\n",
        epochs.n_epochs(),
        epochs.n_times(),
        evoked.peak()
    );
    Ok(())
}

fn edf_example(raw: &RawRecording) -> EegResult<()> {
    println!("4. EDF round trip");
    let path = std::env::temp_dir().join("eegclean_basic_usage.edf");
    raw.write_edf(&path)?;
    let loaded = RawRecording::read_edf(&path)?;
    println!(
        "   wrote and read {} channels x {} samples, bads {:?}\n",
        loaded.n_channels(),
        loaded.n_samples(),
        loaded.info.bads
    );
    Ok(())
}
