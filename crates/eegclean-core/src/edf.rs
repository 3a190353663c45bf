//! EDF/EDF+ reading and writing
//!
//! Format reference: https://www.edfplus.info/specs/edf.html
//!
//! Written files carry a JSON sidecar (`<file>.json`) holding what EDF cannot
//! express: full channel names beyond the 16-byte label field, channel kinds,
//! the bad-channel set, the filter history and the exact sample count before
//! padding to whole data records.

use crate::channel::{ChannelInfo, ChannelType};
use crate::error::EegResult;
use crate::format_error;
use crate::info::{FilterRecord, RecordingInfo};
use crate::recording::RawRecording;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DIGITAL_MIN: i64 = -32768;
const DIGITAL_MAX: i64 = 32767;
const ANNOTATION_LABEL: &str = "EDF Annotations";

#[derive(Debug, Clone)]
struct EdfHeader {
    patient_id: String,
    recording_id: String,
    start_date: String,
    start_time: String,
    header_bytes: usize,
    reserved: String,
    num_data_records: i64,
    record_duration: f64,
    num_signals: usize,
}

#[derive(Debug, Clone)]
struct EdfSignalHeader {
    label: String,
    physical_dimension: String,
    physical_minimum: f64,
    physical_maximum: f64,
    digital_minimum: i64,
    digital_maximum: i64,
    prefiltering: String,
    samples_per_record: usize,
}

impl EdfSignalHeader {
    fn gain(&self) -> f64 {
        (self.physical_maximum - self.physical_minimum)
            / (self.digital_maximum - self.digital_minimum) as f64
    }

    fn offset(&self) -> f64 {
        self.physical_maximum - self.gain() * self.digital_maximum as f64
    }

    fn is_annotation(&self) -> bool {
        self.label == ANNOTATION_LABEL
    }
}

/// Sidecar contents stored next to a written EDF file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdfSidecar {
    pub n_samples: usize,
    /// Channel names as written, before truncation to the label field
    #[serde(default)]
    pub ch_names: Vec<String>,
    pub kinds: Vec<ChannelType>,
    pub bads: Vec<String>,
    pub highpass: f64,
    pub lowpass: f64,
    pub filter_history: Vec<FilterRecord>,
}

/// Location of the sidecar belonging to an EDF path
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

/// Scale factor from a physical dimension to SI volts
fn unit_scale(dimension: &str) -> Option<f64> {
    match dimension.trim() {
        "uV" | "µV" | "μV" | "microV" => Some(1e-6),
        "mV" => Some(1e-3),
        "V" => Some(1.0),
        "nV" => Some(1e-9),
        _ => None,
    }
}

fn read_fixed_string<R: Read>(reader: &mut R, size: usize) -> EegResult<String> {
    let mut buffer = vec![0u8; size];
    reader
        .read_exact(&mut buffer)
        .map_err(|e| format_error!("Truncated EDF header: {}", e))?;
    Ok(String::from_utf8_lossy(&buffer).trim().to_string())
}

fn read_field<R: Read, T: std::str::FromStr>(reader: &mut R, size: usize, what: &str) -> EegResult<T> {
    let s = read_fixed_string(reader, size)?;
    s.parse::<T>()
        .map_err(|_| format_error!("Invalid {} '{}'", what, s))
}

fn read_header<R: Read>(reader: &mut R) -> EegResult<EdfHeader> {
    let version = read_fixed_string(reader, 8)?;
    if version != "0" {
        return Err(format_error!("Unsupported EDF version '{}'", version));
    }
    let patient_id = read_fixed_string(reader, 80)?;
    let recording_id = read_fixed_string(reader, 80)?;
    let start_date = read_fixed_string(reader, 8)?;
    let start_time = read_fixed_string(reader, 8)?;
    let header_bytes = read_field(reader, 8, "header byte count")?;
    let reserved = read_fixed_string(reader, 44)?;
    let num_data_records = read_field(reader, 8, "number of data records")?;
    let record_duration: f64 = read_field(reader, 8, "data record duration")?;
    let num_signals = read_field(reader, 4, "number of signals")?;

    if !(record_duration > 0.0) {
        return Err(format_error!("Data record duration must be positive, got {}", record_duration));
    }

    Ok(EdfHeader {
        patient_id,
        recording_id,
        start_date,
        start_time,
        header_bytes,
        reserved,
        num_data_records,
        record_duration,
        num_signals,
    })
}

fn read_signal_headers<R: Read>(reader: &mut R, n: usize) -> EegResult<Vec<EdfSignalHeader>> {
    let mut labels = Vec::with_capacity(n);
    let mut dimensions = Vec::with_capacity(n);
    let mut pmins = Vec::with_capacity(n);
    let mut pmaxs = Vec::with_capacity(n);
    let mut dmins = Vec::with_capacity(n);
    let mut dmaxs = Vec::with_capacity(n);
    let mut prefilters = Vec::with_capacity(n);
    let mut spr = Vec::with_capacity(n);

    for _ in 0..n {
        labels.push(read_fixed_string(reader, 16)?);
    }
    for _ in 0..n {
        read_fixed_string(reader, 80)?; // transducer type
    }
    for _ in 0..n {
        dimensions.push(read_fixed_string(reader, 8)?);
    }
    for _ in 0..n {
        pmins.push(read_field::<_, f64>(reader, 8, "physical minimum")?);
    }
    for _ in 0..n {
        pmaxs.push(read_field::<_, f64>(reader, 8, "physical maximum")?);
    }
    for _ in 0..n {
        dmins.push(read_field::<_, i64>(reader, 8, "digital minimum")?);
    }
    for _ in 0..n {
        dmaxs.push(read_field::<_, i64>(reader, 8, "digital maximum")?);
    }
    for _ in 0..n {
        prefilters.push(read_fixed_string(reader, 80)?);
    }
    for _ in 0..n {
        spr.push(read_field::<_, usize>(reader, 8, "samples per record")?);
    }
    for _ in 0..n {
        read_fixed_string(reader, 32)?; // reserved
    }

    let mut headers = Vec::with_capacity(n);
    for i in 0..n {
        if dmaxs[i] <= dmins[i] {
            return Err(format_error!(
                "Signal '{}' has digital maximum {} not above minimum {}",
                labels[i], dmaxs[i], dmins[i]
            ));
        }
        headers.push(EdfSignalHeader {
            label: labels[i].clone(),
            physical_dimension: dimensions[i].clone(),
            physical_minimum: pmins[i],
            physical_maximum: pmaxs[i],
            digital_minimum: dmins[i],
            digital_maximum: dmaxs[i],
            prefiltering: prefilters[i].clone(),
            samples_per_record: spr[i],
        });
    }
    Ok(headers)
}

fn parse_start(date: &str, time: &str) -> Option<NaiveDateTime> {
    let d: Vec<u32> = date.split('.').filter_map(|p| p.parse().ok()).collect();
    let t: Vec<u32> = time.split('.').filter_map(|p| p.parse().ok()).collect();
    if d.len() != 3 || t.len() != 3 {
        return None;
    }
    // EDF clipping years: 85-99 are 1985-1999
    let year = (if d[2] >= 85 { 1900 + d[2] } else { 2000 + d[2] }) as i32;
    let date = NaiveDate::from_ymd_opt(year, d[1], d[0])?;
    let time = NaiveTime::from_hms_opt(t[0], t[1], t[2])?;
    Some(NaiveDateTime::new(date, time))
}

/// Parse an "HP:0.5Hz LP:40Hz" prefiltering field
fn parse_prefiltering(field: &str) -> (Option<f64>, Option<f64>) {
    let mut hp = None;
    let mut lp = None;
    for token in field.split_whitespace() {
        let value = |t: &str| t.trim_end_matches("Hz").parse::<f64>().ok();
        if let Some(rest) = token.strip_prefix("HP:") {
            hp = value(rest);
        } else if let Some(rest) = token.strip_prefix("LP:") {
            lp = value(rest);
        }
    }
    (hp, lp)
}

/// Read an EDF or EDF+ file into a recording
pub fn read_edf<P: AsRef<Path>>(path: P) -> EegResult<RawRecording> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let header = read_header(&mut reader)?;
    let signal_headers = read_signal_headers(&mut reader, header.num_signals)?;

    let expected_header = 256 + 256 * header.num_signals;
    if header.header_bytes != expected_header {
        warn!(
            "EDF header declares {} bytes, expected {}",
            header.header_bytes, expected_header
        );
    }
    if header.reserved.starts_with("EDF+D") {
        warn!("Discontinuous EDF+ file, records are read as contiguous");
    }

    let data_signals: Vec<usize> = signal_headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !h.is_annotation())
        .map(|(i, _)| i)
        .collect();
    if data_signals.is_empty() {
        return Err(format_error!("EDF file contains no data signals"));
    }

    let spr = signal_headers[data_signals[0]].samples_per_record;
    if let Some(&odd) = data_signals
        .iter()
        .find(|&&i| signal_headers[i].samples_per_record != spr)
    {
        return Err(format_error!(
            "Signal '{}' has {} samples per record, expected {}; mixed sampling rates are not supported",
            signal_headers[odd].label, signal_headers[odd].samples_per_record, spr
        ));
    }
    let sfreq = spr as f64 / header.record_duration;

    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;
    let record_bytes: usize = signal_headers.iter().map(|h| h.samples_per_record * 2).sum();
    if record_bytes == 0 {
        return Err(format_error!("EDF data records are empty"));
    }
    let n_records = if header.num_data_records < 0 {
        body.len() / record_bytes
    } else {
        header.num_data_records as usize
    };
    if body.len() < n_records * record_bytes {
        return Err(format_error!(
            "EDF data truncated: {} bytes for {} records of {} bytes",
            body.len(),
            n_records,
            record_bytes
        ));
    }

    let mut n_samples = n_records * spr;
    let sidecar = read_sidecar(path)?;
    if let Some(ref sc) = sidecar {
        if sc.n_samples <= n_samples {
            n_samples = sc.n_samples;
        } else {
            warn!("Sidecar sample count {} exceeds file contents, ignoring it", sc.n_samples);
        }
    }

    let full_names = sidecar
        .as_ref()
        .map(|sc| sc.ch_names.as_slice())
        .filter(|names| names.len() == data_signals.len());

    let mut data = Array2::<f64>::zeros((data_signals.len(), n_samples));
    let mut channels = Vec::with_capacity(data_signals.len());

    for (row, &sig) in data_signals.iter().enumerate() {
        let sh = &signal_headers[sig];
        let scale = unit_scale(&sh.physical_dimension);
        let gain = sh.gain() * scale.unwrap_or(1.0);
        let offset = sh.offset() * scale.unwrap_or(1.0);

        let sig_offset: usize = signal_headers[..sig]
            .iter()
            .map(|h| h.samples_per_record * 2)
            .sum();

        for rec in 0..n_records {
            let base = rec * record_bytes + sig_offset;
            for k in 0..spr {
                let col = rec * spr + k;
                if col >= n_samples {
                    break;
                }
                let b = base + 2 * k;
                let digital = i16::from_le_bytes([body[b], body[b + 1]]);
                data[[row, col]] = gain * digital as f64 + offset;
            }
        }

        let name = full_names.map_or_else(|| sh.label.clone(), |names| names[row].clone());
        let mut channel = ChannelInfo::from_label(name.clone());
        if let Some(kind) = sidecar.as_ref().and_then(|sc| sc.kinds.get(row)) {
            channel = ChannelInfo::new(name, *kind);
        }
        if scale.is_none() {
            channel.unit = sh.physical_dimension.clone();
        }
        channels.push(channel);
    }

    let mut info = RecordingInfo::new(sfreq, channels)?;
    info.meas_date = parse_start(&header.start_date, &header.start_time);
    info.subject_id = header.patient_id.clone();
    info.recording_id = header.recording_id.clone();

    match sidecar {
        Some(sc) => {
            info.mark_bads(&sc.bads)?;
            info.highpass = sc.highpass;
            info.lowpass = sc.lowpass;
            info.filter_history = sc.filter_history;
        }
        None => {
            let (hp, lp) = parse_prefiltering(&signal_headers[data_signals[0]].prefiltering);
            if let Some(hp) = hp {
                info.highpass = hp;
            }
            if let Some(lp) = lp {
                info.lowpass = lp;
            }
        }
    }

    info!(
        "Loaded EDF {}: {} channels, {} samples @ {} Hz",
        path.display(),
        info.n_channels(),
        n_samples,
        sfreq
    );

    RawRecording::new(data, info)
}

fn read_sidecar(path: &Path) -> EegResult<Option<EdfSidecar>> {
    let sc_path = sidecar_path(path);
    if !sc_path.exists() {
        return Ok(None);
    }
    let file = File::open(&sc_path)?;
    let sidecar: EdfSidecar = serde_json::from_reader(BufReader::new(file))?;
    debug!("Read sidecar {}", sc_path.display());
    Ok(Some(sidecar))
}

/// Format a number into at most 8 ASCII characters
fn format_edf_number(value: f64) -> EegResult<String> {
    for precision in (0..=6).rev() {
        let s = format!("{:.*}", precision, value);
        if s.len() <= 8 {
            return Ok(s);
        }
    }
    Err(format_error!("Value {} does not fit an 8 character EDF field", value))
}

fn write_fixed_string<W: Write>(writer: &mut W, s: &str, size: usize) -> EegResult<()> {
    let mut buffer = vec![b' '; size];
    let bytes = s.as_bytes();
    let copy_len = bytes.len().min(size);
    buffer[..copy_len].copy_from_slice(&bytes[..copy_len]);
    writer.write_all(&buffer)?;
    Ok(())
}

/// Physical range of a channel in file units with a 10% margin
fn physical_range(row: ndarray::ArrayView1<'_, f64>, scale: f64) -> EegResult<(f64, f64)> {
    let min = row.fold(f64::INFINITY, |a, &b| a.min(b)) / scale;
    let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b)) / scale;
    if !min.is_finite() || !max.is_finite() {
        return Ok((-1.0, 1.0));
    }
    let margin = (max - min).abs() * 0.1;
    let (lo, hi) = if margin == 0.0 {
        (min - 1.0, max + 1.0)
    } else {
        (min - margin, max + margin)
    };
    let lo: f64 = format_edf_number(lo)?.parse().map_err(|_| format_error!("Bad range {}", lo))?;
    let hi: f64 = format_edf_number(hi)?.parse().map_err(|_| format_error!("Bad range {}", hi))?;
    if hi <= lo {
        return Err(format_error!("Degenerate physical range [{}, {}]", lo, hi));
    }
    Ok((lo, hi))
}

/// Write a recording as 16-bit EDF, overwriting `path`, plus its sidecar
pub fn write_edf<P: AsRef<Path>>(raw: &RawRecording, path: P) -> EegResult<()> {
    let path = path.as_ref();
    let sfreq = raw.sfreq();
    if (sfreq - sfreq.round()).abs() > 1e-9 {
        return Err(format_error!(
            "EDF export needs an integer sampling frequency, got {}",
            sfreq
        ));
    }
    let spr = sfreq.round() as usize;
    let n_samples = raw.n_samples();
    let n_records = (n_samples + spr - 1) / spr;

    let mut signal_headers = Vec::with_capacity(raw.n_channels());
    let mut scales = Vec::with_capacity(raw.n_channels());
    let prefiltering = format!("HP:{}Hz LP:{}Hz", raw.info.highpass, raw.info.lowpass);

    for (idx, ch) in raw.info.channels.iter().enumerate() {
        if ch.name.len() > 16 {
            debug!("Label '{}' is truncated in the EDF header, the sidecar keeps it", ch.name);
        }
        let (dimension, scale) = if ch.kind.is_voltage() {
            ("uV".to_string(), 1e-6)
        } else {
            (ch.unit.clone(), 1.0)
        };
        let (pmin, pmax) = physical_range(raw.data.row(idx), scale)?;
        signal_headers.push(EdfSignalHeader {
            label: ch.name.clone(),
            physical_dimension: dimension,
            physical_minimum: pmin,
            physical_maximum: pmax,
            digital_minimum: DIGITAL_MIN,
            digital_maximum: DIGITAL_MAX,
            prefiltering: prefiltering.clone(),
            samples_per_record: spr,
        });
        scales.push(scale);
    }

    let (start_date, start_time) = match raw.info.meas_date {
        Some(dt) => (
            format!("{:02}.{:02}.{:02}", dt.day(), dt.month(), dt.year() % 100),
            format!("{:02}.{:02}.{:02}", dt.hour(), dt.minute(), dt.second()),
        ),
        None => ("01.01.00".to_string(), "00.00.00".to_string()),
    };
    let subject = if raw.info.subject_id.is_empty() { "X X X X" } else { raw.info.subject_id.as_str() };

    let mut writer = BufWriter::new(File::create(path)?);
    let n = signal_headers.len();

    write_fixed_string(&mut writer, "0", 8)?;
    write_fixed_string(&mut writer, subject, 80)?;
    write_fixed_string(&mut writer, &raw.info.recording_id, 80)?;
    write_fixed_string(&mut writer, &start_date, 8)?;
    write_fixed_string(&mut writer, &start_time, 8)?;
    write_fixed_string(&mut writer, &(256 + 256 * n).to_string(), 8)?;
    write_fixed_string(&mut writer, "", 44)?;
    write_fixed_string(&mut writer, &n_records.to_string(), 8)?;
    write_fixed_string(&mut writer, "1", 8)?;
    write_fixed_string(&mut writer, &n.to_string(), 4)?;

    for sh in &signal_headers {
        write_fixed_string(&mut writer, &sh.label, 16)?;
    }
    for _ in &signal_headers {
        write_fixed_string(&mut writer, "", 80)?;
    }
    for sh in &signal_headers {
        write_fixed_string(&mut writer, &sh.physical_dimension, 8)?;
    }
    for sh in &signal_headers {
        write_fixed_string(&mut writer, &format_edf_number(sh.physical_minimum)?, 8)?;
    }
    for sh in &signal_headers {
        write_fixed_string(&mut writer, &format_edf_number(sh.physical_maximum)?, 8)?;
    }
    for sh in &signal_headers {
        write_fixed_string(&mut writer, &sh.digital_minimum.to_string(), 8)?;
    }
    for sh in &signal_headers {
        write_fixed_string(&mut writer, &sh.digital_maximum.to_string(), 8)?;
    }
    for sh in &signal_headers {
        write_fixed_string(&mut writer, &sh.prefiltering, 80)?;
    }
    for sh in &signal_headers {
        write_fixed_string(&mut writer, &sh.samples_per_record.to_string(), 8)?;
    }
    for _ in &signal_headers {
        write_fixed_string(&mut writer, "", 32)?;
    }

    for rec in 0..n_records {
        for (idx, sh) in signal_headers.iter().enumerate() {
            let gain = sh.gain();
            let offset = sh.offset();
            for k in 0..spr {
                let col = rec * spr + k;
                // Pad the final record with zeros
                let physical = if col < n_samples { raw.data[[idx, col]] / scales[idx] } else { 0.0 };
                let digital = ((physical - offset) / gain)
                    .round()
                    .clamp(DIGITAL_MIN as f64, DIGITAL_MAX as f64) as i16;
                writer.write_all(&digital.to_le_bytes())?;
            }
        }
    }
    writer.flush()?;

    let sidecar = EdfSidecar {
        n_samples,
        ch_names: raw.info.ch_names(),
        kinds: raw.info.channels.iter().map(|c| c.kind).collect(),
        bads: raw.info.bads.iter().cloned().collect(),
        highpass: raw.info.highpass,
        lowpass: raw.info.lowpass,
        filter_history: raw.info.filter_history.clone(),
    };
    let sc_file = File::create(sidecar_path(path))?;
    serde_json::to_writer_pretty(BufWriter::new(sc_file), &sidecar)?;

    info!(
        "Wrote EDF {}: {} channels, {} records",
        path.display(),
        n,
        n_records
    );
    Ok(())
}

impl RawRecording {
    /// Read an EDF/EDF+ file
    pub fn read_edf<P: AsRef<Path>>(path: P) -> EegResult<Self> {
        read_edf(path)
    }

    /// Write this recording as EDF, overwriting any existing file
    pub fn write_edf<P: AsRef<Path>>(&self, path: P) -> EegResult<()> {
        write_edf(self, path)
    }
}
