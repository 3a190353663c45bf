//! eegclean: bandpass, ICA and eyeblink removal for EEG recordings

mod app;
mod processing_service;
mod ui;

use anyhow::{Context, Result};
use app::EegCleanApp;
use clap::Parser;
use eegclean_processing::{PipelineConfig, ProcessingProfile};
use processing_service::{run_pipeline, InputSource};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Remove eyeblink artifacts from an EEG recording
#[derive(Parser, Debug)]
#[command(name = "eegclean", version, about)]
struct Args {
    /// EDF/EDF+ recording to clean
    #[arg(short, long, env = "EEGCLEAN_INPUT", conflicts_with = "simulate")]
    input: Option<PathBuf>,

    /// Where to write the cleaned EDF
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also save the fitted ICA as JSON
    #[arg(long, requires = "output")]
    ica_output: Option<PathBuf>,

    /// JSON pipeline configuration
    #[arg(short, long, env = "EEGCLEAN_CONFIG")]
    config: Option<PathBuf>,

    /// Parameter preset, ignored when --config is given
    #[arg(long, value_enum, default_value_t = Profile::Standard)]
    profile: Profile,

    /// Use a simulated recording of this many seconds
    #[arg(long, value_name = "SECONDS")]
    simulate: Option<f64>,

    /// Seed for the simulated recording
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Run once without the viewer and exit
    #[arg(long)]
    headless: bool,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum Profile {
    Standard,
    Quick,
}

impl From<Profile> for ProcessingProfile {
    fn from(profile: Profile) -> Self {
        match profile {
            Profile::Standard => ProcessingProfile::Standard,
            Profile::Quick => ProcessingProfile::Quick,
        }
    }
}

impl Args {
    fn source(&self) -> InputSource {
        match (&self.input, self.simulate) {
            (Some(path), _) => InputSource::File(path.clone()),
            (None, Some(duration)) => InputSource::Simulated {
                duration,
                seed: Some(self.seed),
            },
            (None, None) => InputSource::Simulated {
                duration: 60.0,
                seed: Some(self.seed),
            },
        }
    }

    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => PipelineConfig::for_profile(self.profile.into()),
        };
        if let Some(output) = &self.output {
            config.output.path = Some(output.clone());
        }
        if let Some(ica_output) = &self.ica_output {
            config.output.ica_path = Some(ica_output.clone());
        }
        config.validate().context("Invalid pipeline configuration")?;
        Ok(config)
    }
}

fn run_headless(source: InputSource, config: PipelineConfig) -> Result<()> {
    info!("Running '{}' on {}", config.name, source);
    let outcome = run_pipeline(&source, &config)?;
    let result = &outcome.result;

    println!("{}", result.summary());
    for warning in &result.warnings {
        println!("warning: {}", warning);
    }
    if let Some(eog) = &result.context.eog {
        println!(
            "{} EOG events on {}, excluded components {:?}",
            eog.events.len(),
            eog.channel,
            eog.indices
        );
    }
    match &config.output.path {
        Some(path) => println!("wrote {}", path.display()),
        None => println!("no output path given, nothing written"),
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let source = args.source();
    let config = args.pipeline_config()?;

    if args.headless {
        return run_headless(source, config);
    }

    info!("Starting viewer on {}", source);
    let app = EegCleanApp::new(source, config)?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 900.0])
            .with_min_inner_size([1000.0, 700.0]),
        ..Default::default()
    };

    eframe::run_native("eegclean", options, Box::new(|_cc| Ok(Box::new(app))))
        .map_err(|e| anyhow::anyhow!("Failed to run viewer: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_source_is_simulated() {
        let args = Args::parse_from(["eegclean", "--headless"]);
        assert_eq!(
            args.source(),
            InputSource::Simulated {
                duration: 60.0,
                seed: Some(42)
            }
        );
        assert!(args.headless);
    }

    #[test]
    fn test_output_flags_reach_config() {
        let args = Args::parse_from([
            "eegclean",
            "--input",
            "rec.edf",
            "--output",
            "out.edf",
            "--ica-output",
            "out-ica.json",
            "--profile",
            "quick",
        ]);
        assert_eq!(args.source(), InputSource::File(PathBuf::from("rec.edf")));

        let config = args.pipeline_config().unwrap();
        assert_eq!(config.profile, ProcessingProfile::Quick);
        assert_eq!(config.output.path, Some(PathBuf::from("out.edf")));
        assert_eq!(config.output.ica_path, Some(PathBuf::from("out-ica.json")));
    }

    #[test]
    fn test_input_conflicts_with_simulate() {
        assert!(Args::try_parse_from(["eegclean", "--input", "a.edf", "--simulate", "30"]).is_err());
    }

    #[test]
    fn test_config_file_overrides_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        let mut config = PipelineConfig::standard();
        config.ica.n_components = 12;
        std::fs::write(&path, config.to_json().unwrap()).unwrap();

        let args = Args::parse_from(["eegclean", "--config", path.to_str().unwrap(), "--profile", "quick"]);
        let loaded = args.pipeline_config().unwrap();
        assert_eq!(loaded.profile, ProcessingProfile::Standard);
        assert_eq!(loaded.ica.n_components, 12);
    }

    #[test]
    fn test_headless_run_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cleaned.edf");
        let mut config = PipelineConfig::quick();
        config.ica.n_components = 10;
        config.output.path = Some(path.clone());

        run_headless(InputSource::Simulated { duration: 20.0, seed: Some(11) }, config).unwrap();
        assert!(path.exists());
    }
}
