//! Background service that runs the cleaning pipeline off the UI thread

use eegclean_core::{EegError, EegResult, RawRecording};
use eegclean_processing::{Ica, Pipeline, PipelineConfig, PipelinePerformance, PipelineResult, StepMetrics};
use eegclean_simulation::{EEGConfig, EEGSimulator};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

/// Where the recording comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputSource {
    /// EDF/EDF+ file on disk
    File(PathBuf),
    /// Synthetic recording with blinks
    Simulated { duration: f64, seed: Option<u64> },
}

impl Default for InputSource {
    fn default() -> Self {
        InputSource::Simulated {
            duration: 60.0,
            seed: Some(42),
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::File(path) => write!(f, "{}", path.display()),
            InputSource::Simulated { duration, seed } => match seed {
                Some(seed) => write!(f, "simulated {:.0} s (seed {})", duration, seed),
                None => write!(f, "simulated {:.0} s", duration),
            },
        }
    }
}

/// A recording as loaded, before any step ran
#[derive(Debug, Clone)]
pub struct LoadedRecording {
    pub raw: RawRecording,
    /// Ground-truth blink peaks, known only for simulated input
    pub blink_samples: Vec<usize>,
}

impl InputSource {
    pub fn load(&self) -> EegResult<LoadedRecording> {
        match self {
            InputSource::File(path) => {
                info!("Reading {}", path.display());
                Ok(LoadedRecording {
                    raw: RawRecording::read_edf(path)?,
                    blink_samples: Vec::new(),
                })
            }
            InputSource::Simulated { duration, seed } => {
                info!("Simulating {:.0} s of EEG", duration);
                let config = EEGConfig {
                    seed: *seed,
                    ..EEGConfig::default()
                };
                let session = EEGSimulator::new(config)?.generate(*duration)?;
                Ok(LoadedRecording {
                    raw: session.raw,
                    blink_samples: session.blink_samples,
                })
            }
        }
    }
}

/// Everything the viewer needs from one successful run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub source: InputSource,
    pub input: LoadedRecording,
    pub result: PipelineResult,
    /// Component time courses of the filtered recording
    pub sources: Option<Array2<f64>>,
    pub performance: PipelinePerformance,
}

impl RunOutcome {
    /// The fitted decomposition, if the run got that far
    pub fn ica(&self) -> Option<&Ica> {
        self.result.context.ica.as_ref()
    }
}

/// A failed run and the metrics of the steps that did execute
#[derive(Debug, Clone)]
pub struct RunFailure {
    pub error: EegError,
    pub metrics: Vec<StepMetrics>,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.metrics.iter().find(|m| !m.success) {
            Some(step) => write!(f, "step '{}' failed: {}", step.step, self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for RunFailure {}

impl From<EegError> for RunFailure {
    fn from(error: EegError) -> Self {
        RunFailure {
            error,
            metrics: Vec::new(),
        }
    }
}

/// Load the input and run the pipeline described by `config` over it
pub fn run_pipeline(source: &InputSource, config: &PipelineConfig) -> Result<RunOutcome, RunFailure> {
    let input = source.load()?;
    let mut pipeline = Pipeline::from_config(config)?;

    let result = match pipeline.run(input.raw.copy()) {
        Ok(result) => result,
        Err(error) => {
            return Err(RunFailure {
                error,
                metrics: pipeline.last_metrics().to_vec(),
            })
        }
    };

    let sources = match result.context.ica.as_ref() {
        Some(ica) => Some(ica.get_sources(&result.context.raw)?),
        None => None,
    };

    Ok(RunOutcome {
        source: source.clone(),
        input,
        result,
        sources,
        performance: pipeline.performance_summary(),
    })
}

/// Commands accepted by the service
#[derive(Debug, Clone)]
pub enum ProcessingCommand {
    /// Load `source` and run the pipeline
    Run {
        source: InputSource,
        config: PipelineConfig,
    },
    /// Write a cleaned recording, and optionally the decomposition
    Save {
        recording: Box<RawRecording>,
        path: PathBuf,
        ica: Option<(Box<Ica>, PathBuf)>,
    },
    Shutdown,
}

/// Messages from the service back to the UI
#[derive(Debug)]
pub enum ServiceEvent {
    Started { source: InputSource },
    Finished(Box<RunOutcome>),
    Failed(RunFailure),
    Saved { path: PathBuf },
    SaveFailed { message: String },
}

/// Counters shown in the statistics panel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub is_running: bool,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub last_run_time_us: u64,
    pub total_processing_time_us: u64,
    pub files_saved: u64,
}

impl ProcessingStats {
    pub fn average_run_time_us(&self) -> u64 {
        let runs = self.runs_completed + self.runs_failed;
        if runs > 0 {
            self.total_processing_time_us / runs
        } else {
            0
        }
    }
}

/// Runs commands one at a time on blocking tasks
pub struct ProcessingService {
    command_receiver: mpsc::Receiver<ProcessingCommand>,
    event_sender: mpsc::UnboundedSender<ServiceEvent>,
    stats: Arc<Mutex<ProcessingStats>>,
}

impl ProcessingService {
    pub fn new(
        command_receiver: mpsc::Receiver<ProcessingCommand>,
        event_sender: mpsc::UnboundedSender<ServiceEvent>,
    ) -> Self {
        ProcessingService {
            command_receiver,
            event_sender,
            stats: Arc::new(Mutex::new(ProcessingStats::default())),
        }
    }

    pub fn stats_handle(&self) -> Arc<Mutex<ProcessingStats>> {
        self.stats.clone()
    }

    /// Main command loop
    pub async fn run(&mut self) {
        info!("Processing service started");

        while let Some(command) = self.command_receiver.recv().await {
            match command {
                ProcessingCommand::Run { source, config } => self.handle_run(source, config).await,
                ProcessingCommand::Save { recording, path, ica } => self.handle_save(*recording, path, ica).await,
                ProcessingCommand::Shutdown => break,
            }
        }

        info!("Processing service stopped");
    }

    async fn handle_run(&mut self, source: InputSource, config: PipelineConfig) {
        self.update_stats(|stats| stats.is_running = true).await;
        self.send(ServiceEvent::Started { source: source.clone() });

        let start_time = std::time::Instant::now();
        let outcome = tokio::task::spawn_blocking(move || run_pipeline(&source, &config)).await;
        let elapsed_us = start_time.elapsed().as_micros() as u64;

        let event = match outcome {
            Ok(Ok(outcome)) => {
                info!("Run finished in {:.1} ms", elapsed_us as f64 / 1000.0);
                self.update_stats(|stats| stats.runs_completed += 1).await;
                ServiceEvent::Finished(Box::new(outcome))
            }
            Ok(Err(failure)) => {
                warn!("Run failed: {}", failure);
                self.update_stats(|stats| stats.runs_failed += 1).await;
                ServiceEvent::Failed(failure)
            }
            Err(e) => {
                error!("Pipeline task panicked: {}", e);
                self.update_stats(|stats| stats.runs_failed += 1).await;
                ServiceEvent::Failed(RunFailure::from(EegError::ProcessingError {
                    message: format!("pipeline task aborted: {}", e),
                }))
            }
        };

        self.update_stats(|stats| {
            stats.is_running = false;
            stats.last_run_time_us = elapsed_us;
            stats.total_processing_time_us += elapsed_us;
        })
        .await;
        self.send(event);
    }

    async fn handle_save(&mut self, recording: RawRecording, path: PathBuf, ica: Option<(Box<Ica>, PathBuf)>) {
        let target = path.clone();
        let saved = tokio::task::spawn_blocking(move || -> EegResult<()> {
            recording.write_edf(&target)?;
            if let Some((ica, ica_path)) = ica {
                ica.save(&ica_path)?;
            }
            Ok(())
        })
        .await;

        let event = match saved {
            Ok(Ok(())) => {
                info!("Saved {}", path.display());
                self.update_stats(|stats| stats.files_saved += 1).await;
                ServiceEvent::Saved { path }
            }
            Ok(Err(e)) => ServiceEvent::SaveFailed { message: e.to_string() },
            Err(e) => ServiceEvent::SaveFailed {
                message: format!("save task aborted: {}", e),
            },
        };
        self.send(event);
    }

    fn send(&self, event: ServiceEvent) {
        // The UI may already be gone during shutdown
        if self.event_sender.send(event).is_err() {
            warn!("No receiver for service event");
        }
    }

    async fn update_stats<F>(&self, update_fn: F)
    where
        F: FnOnce(&mut ProcessingStats),
    {
        let mut stats = self.stats.lock().await;
        update_fn(&mut stats);
    }
}

/// Spawn the service on `runtime` and return its handles
pub fn start_processing_service(
    runtime: &tokio::runtime::Runtime,
) -> (
    mpsc::Sender<ProcessingCommand>,
    mpsc::UnboundedReceiver<ServiceEvent>,
    Arc<Mutex<ProcessingStats>>,
) {
    let (command_sender, command_receiver) = mpsc::channel(8);
    let (event_sender, event_receiver) = mpsc::unbounded_channel();
    let mut service = ProcessingService::new(command_receiver, event_sender);
    let stats = service.stats_handle();

    runtime.spawn(async move {
        service.run().await;
    });

    (command_sender, event_receiver, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> PipelineConfig {
        let mut config = PipelineConfig::quick();
        config.ica.n_components = 10;
        config.filter.n_jobs = 1;
        config
    }

    #[test]
    fn test_input_source_display() {
        assert_eq!(
            InputSource::Simulated { duration: 30.0, seed: Some(1) }.to_string(),
            "simulated 30 s (seed 1)"
        );
        assert_eq!(InputSource::File(PathBuf::from("a.edf")).to_string(), "a.edf");
    }

    #[test]
    fn test_run_pipeline_on_simulated_input() {
        let source = InputSource::Simulated {
            duration: 30.0,
            seed: Some(5),
        };
        let outcome = run_pipeline(&source, &quick_config()).unwrap();

        assert!(!outcome.input.blink_samples.is_empty());
        assert_eq!(outcome.input.raw.info.highpass, 0.0);
        assert_eq!(outcome.result.context.raw.info.highpass, 1.0);

        let sources = outcome.sources.as_ref().unwrap();
        assert_eq!(sources.nrows(), 10);
        assert_eq!(sources.ncols(), outcome.input.raw.n_samples());
        assert_eq!(outcome.performance.step_count, 5);
    }

    #[test]
    fn test_run_pipeline_failure_keeps_metrics() {
        let mut config = quick_config();
        config.ica.n_components = 64;
        let failure = run_pipeline(&InputSource::Simulated { duration: 10.0, seed: Some(2) }, &config).unwrap_err();

        assert!(matches!(failure.error, EegError::Decomposition { .. }));
        assert_eq!(failure.metrics.last().map(|m| m.step.as_str()), Some("fit_ica"));
        assert!(failure.to_string().starts_with("step 'fit_ica' failed"));
    }

    #[test]
    fn test_missing_file_fails_before_pipeline() {
        let source = InputSource::File(PathBuf::from("/nonexistent/recording.edf"));
        let failure = run_pipeline(&source, &quick_config()).unwrap_err();
        assert!(failure.metrics.is_empty());
    }

    #[test]
    fn test_service_runs_and_saves() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (commands, mut events, stats) = start_processing_service(&runtime);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cleaned.edf");

        runtime.block_on(async {
            commands
                .send(ProcessingCommand::Run {
                    source: InputSource::Simulated { duration: 20.0, seed: Some(9) },
                    config: quick_config(),
                })
                .await
                .unwrap();

            assert!(matches!(events.recv().await, Some(ServiceEvent::Started { .. })));
            let outcome = match events.recv().await {
                Some(ServiceEvent::Finished(outcome)) => outcome,
                other => panic!("unexpected event {:?}", other),
            };

            commands
                .send(ProcessingCommand::Save {
                    recording: Box::new(outcome.result.output().clone()),
                    path: path.clone(),
                    ica: None,
                })
                .await
                .unwrap();
            assert!(matches!(events.recv().await, Some(ServiceEvent::Saved { .. })));

            let stats = stats.lock().await.clone();
            assert_eq!(stats.runs_completed, 1);
            assert_eq!(stats.files_saved, 1);
            assert!(!stats.is_running);

            commands.send(ProcessingCommand::Shutdown).await.unwrap();
        });

        assert!(path.exists());
    }
}
