//! Main application state and logic

use eegclean_processing::{PipelineConfig, ProcessingProfile};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::processing_service::{
    start_processing_service, InputSource, ProcessingCommand, ProcessingStats, RunFailure, RunOutcome, ServiceEvent,
};
use crate::ui::{ControlPanel, PlotData, PlotMode, TraceView, UIState};

/// Main application state
pub struct EegCleanApp {
    // Keeps the service task alive
    runtime: tokio::runtime::Runtime,
    command_sender: mpsc::Sender<ProcessingCommand>,
    event_receiver: mpsc::UnboundedReceiver<ServiceEvent>,
    processing_stats: Arc<Mutex<ProcessingStats>>,

    pub ui_state: UIState,
    pub config: PipelineConfig,
    pub source: InputSource,

    outcome: Option<Box<RunOutcome>>,
    plot_data: Option<PlotData>,
    failure: Option<RunFailure>,
    busy: bool,
    status: String,

    last_update: Instant,
    frame_count: u64,
}

/// Counters for the statistics panel
#[derive(Debug, Clone)]
pub struct AppStats {
    pub busy: bool,
    pub n_channels: usize,
    pub n_samples: usize,
    pub duration: f64,
    pub n_components: usize,
    pub n_excluded: usize,
    pub n_eog_events: usize,
    pub frame_count: u64,
    pub fps: f32,
}

impl EegCleanApp {
    /// Create the app and start a first run on `source`
    pub fn new(source: InputSource, config: PipelineConfig) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| anyhow::anyhow!("Failed to create tokio runtime: {}", e))?;
        let (command_sender, event_receiver, processing_stats) = start_processing_service(&runtime);

        let mut ui_state = UIState::new();
        ui_state.bads_text = config.bads.join(", ");
        ui_state.eog_channel_text = config.eog.ch_name.clone().unwrap_or_default();

        let mut app = EegCleanApp {
            runtime,
            command_sender,
            event_receiver,
            processing_stats,
            ui_state,
            config,
            source,
            outcome: None,
            plot_data: None,
            failure: None,
            busy: false,
            status: "Idle".to_string(),
            last_update: Instant::now(),
            frame_count: 0,
        };
        app.run_pipeline();
        Ok(app)
    }

    fn send_command(&mut self, command: ProcessingCommand) -> bool {
        match self.command_sender.try_send(command) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send processing command: {}", e);
                self.status = format!("Service unavailable: {}", e);
                false
            }
        }
    }

    /// Copy the text fields into the configuration
    fn apply_text_fields(&mut self) {
        self.config.bads = self
            .ui_state
            .bads_text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let eog = self.ui_state.eog_channel_text.trim();
        self.config.eog.ch_name = (!eog.is_empty()).then(|| eog.to_string());
    }

    /// Run the pipeline with the current parameters
    pub fn run_pipeline(&mut self) {
        if self.busy {
            return;
        }
        self.apply_text_fields();

        if let Err(e) = self.config.validate() {
            warn!("Invalid parameters: {}", e);
            self.status = format!("Invalid parameters: {}", e);
            return;
        }

        // Saving happens through the dialog, not as a pipeline step
        let mut config = self.config.clone();
        config.output = Default::default();

        let command = ProcessingCommand::Run {
            source: self.source.clone(),
            config,
        };
        if self.send_command(command) {
            self.busy = true;
        }
    }

    /// Ask for a path and write the cleaned recording there
    pub fn save_output(&mut self) {
        let Some(outcome) = self.outcome.as_ref() else {
            return;
        };
        let Some(path) = rfd::FileDialog::new()
            .add_filter("EDF", &["edf"])
            .set_file_name("cleaned_raw.edf")
            .save_file()
        else {
            return;
        };

        let ica = outcome
            .ica()
            .map(|ica| (Box::new(ica.clone()), path.with_extension("ica.json")));
        let command = ProcessingCommand::Save {
            recording: Box::new(outcome.result.output().clone()),
            path,
            ica,
        };
        if self.send_command(command) {
            self.busy = true;
            self.status = "Saving...".to_string();
        }
    }

    /// Replace the parameters with a named profile
    pub fn set_profile(&mut self, profile: ProcessingProfile) {
        let n_jobs = self.config.filter.n_jobs;
        self.config = PipelineConfig::for_profile(profile);
        self.config.filter.n_jobs = n_jobs;
        self.ui_state.bads_text = self.config.bads.join(", ");
        self.ui_state.eog_channel_text = self.config.eog.ch_name.clone().unwrap_or_default();
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn has_output(&self) -> bool {
        self.outcome.is_some()
    }

    /// Drain service events (called every frame)
    fn update_data(&mut self) {
        while let Ok(event) = self.event_receiver.try_recv() {
            match event {
                ServiceEvent::Started { source } => {
                    self.status = format!("Processing {}", source);
                }
                ServiceEvent::Finished(outcome) => {
                    info!("{}", outcome.result.summary());
                    self.status = format!(
                        "Done in {:.1} s, {} warning(s)",
                        outcome.result.total_time_us as f64 / 1e6,
                        outcome.result.warnings.len()
                    );
                    self.plot_data = Some(PlotData::new(&outcome));
                    self.clamp_view(&outcome);
                    self.outcome = Some(outcome);
                    self.failure = None;
                    self.busy = false;
                }
                ServiceEvent::Failed(failure) => {
                    self.status = format!("Failed: {}", failure);
                    self.failure = Some(failure);
                    self.busy = false;
                }
                ServiceEvent::Saved { path } => {
                    self.status = format!("Saved {}", path.display());
                    self.busy = false;
                }
                ServiceEvent::SaveFailed { message } => {
                    self.status = format!("Save failed: {}", message);
                    self.busy = false;
                }
            }
        }

        self.frame_count += 1;
    }

    /// Keep view indices inside a new recording
    fn clamp_view(&mut self, outcome: &RunOutcome) {
        let raw = &outcome.result.context.raw;
        let state = &mut self.ui_state;
        state.first_channel = state.first_channel.min(raw.n_channels().saturating_sub(1));
        state.selected_channel = state.selected_channel.min(raw.n_channels().saturating_sub(1));
        state.window_start = state.window_start.min((raw.duration() - state.window_duration).max(0.0));
        let n_components = outcome.ica().map(|ica| ica.n_components()).unwrap_or(0);
        state.first_component = state.first_component.min(n_components.saturating_sub(1));
    }

    /// Get current statistics
    pub fn get_stats(&self) -> AppStats {
        let raw = self.outcome.as_ref().map(|o| &o.result.context.raw);
        let ica = self.outcome.as_ref().and_then(|o| o.ica());
        let eog = self.outcome.as_ref().and_then(|o| o.result.context.eog.as_ref());

        AppStats {
            busy: self.busy,
            n_channels: raw.map(|r| r.n_channels()).unwrap_or(0),
            n_samples: raw.map(|r| r.n_samples()).unwrap_or(0),
            duration: raw.map(|r| r.duration()).unwrap_or(0.0),
            n_components: ica.map(|i| i.n_components()).unwrap_or(0),
            n_excluded: ica.map(|i| i.exclude.len()).unwrap_or(0),
            n_eog_events: eog.map(|e| e.events.len()).unwrap_or(0),
            frame_count: self.frame_count,
            fps: self.calculate_fps(),
        }
    }

    /// Get processing statistics without blocking the UI thread
    pub fn get_processing_stats(&self) -> Option<ProcessingStats> {
        self.processing_stats.try_lock().ok().map(|stats| stats.clone())
    }

    fn calculate_fps(&self) -> f32 {
        let elapsed = self.last_update.elapsed().as_secs_f32();
        if elapsed > 0.0 {
            1.0 / elapsed
        } else {
            0.0
        }
    }

    fn show_stats_panel(&self, ui: &mut egui::Ui) {
        ui.heading("Recording");
        ui.separator();

        let stats = self.get_stats();
        ui.label(format!("Status: {}", if stats.busy { "Processing" } else { "Idle" }));
        ui.label(format!("Source: {}", self.source));
        ui.label(format!("Channels: {}", stats.n_channels));
        ui.label(format!("Samples: {}", stats.n_samples));
        ui.label(format!("Duration: {:.1}s", stats.duration));

        if let Some(outcome) = self.outcome.as_ref() {
            let info = &outcome.result.context.raw.info;
            ui.label(format!("Loaded: {}", outcome.source));
            ui.label(format!("Rate: {:.0}Hz", info.sfreq));
            ui.label(format!("Passband: {:.2} - {:.1}Hz", info.highpass, info.lowpass));
            ui.label(format!(
                "Bads: {}",
                if info.bads.is_empty() {
                    "none".to_string()
                } else {
                    info.bads.iter().cloned().collect::<Vec<_>>().join(", ")
                }
            ));

            ui.separator();
            ui.heading("ICA");
            ui.label(format!("Components: {}", stats.n_components));
            ui.label(format!("EOG events: {}", stats.n_eog_events));
            ui.label(format!("Excluded: {}", stats.n_excluded));
            if let Some(ica) = outcome.ica() {
                let total: f64 = ica.explained_variance().iter().sum();
                if let Some(first) = ica.explained_variance().first() {
                    ui.label(format!("First component: {:.1}% of variance", 100.0 * first / total.max(f64::EPSILON)));
                }
            }

            ui.separator();
            ui.heading("Steps");
            for metrics in &outcome.result.processing_metrics {
                ui.label(format!("{}: {:.1}ms", metrics.step, metrics.processing_time_ms()));
                ui.small(&metrics.details.summary);
            }
            if let Some(slowest) = &outcome.performance.slowest_step {
                ui.label(format!("Slowest: {}", slowest));
            }

            if !outcome.result.warnings.is_empty() {
                ui.separator();
                ui.label("Warnings:");
                for warning in &outcome.result.warnings {
                    ui.colored_label(egui::Color32::YELLOW, format!("• {}", warning));
                }
            }
        }

        if let Some(failure) = self.failure.as_ref() {
            ui.separator();
            ui.colored_label(egui::Color32::RED, failure.to_string());
            for metrics in &failure.metrics {
                let mark = if metrics.success { "ok" } else { "failed" };
                ui.label(format!("{}: {}", metrics.step, mark));
            }
        }

        ui.separator();
        ui.heading("Service");
        if let Some(proc_stats) = self.get_processing_stats() {
            ui.label(format!("Worker: {}", if proc_stats.is_running { "running" } else { "idle" }));
            ui.label(format!("Runs: {} ok, {} failed", proc_stats.runs_completed, proc_stats.runs_failed));
            ui.label(format!("Last run: {:.1}ms", proc_stats.last_run_time_us as f64 / 1000.0));
            ui.label(format!("Average run: {:.1}ms", proc_stats.average_run_time_us() as f64 / 1000.0));
            ui.label(format!("Files saved: {}", proc_stats.files_saved));
        } else {
            ui.label("Processing stats unavailable");
        }
        ui.label(format!("Frames: {} ({:.1} FPS)", stats.frame_count, stats.fps));
    }

    fn show_view_controls(&mut self, ui: &mut egui::Ui) {
        let Some(outcome) = self.outcome.as_ref() else {
            return;
        };
        let raw = &outcome.result.context.raw;
        let state = &mut self.ui_state;

        ui.horizontal(|ui| match state.plot_mode {
            PlotMode::Traces => {
                ui.selectable_value(&mut state.trace_view, TraceView::Input, "Input");
                ui.selectable_value(&mut state.trace_view, TraceView::Filtered, "Filtered");
                ui.selectable_value(&mut state.trace_view, TraceView::Cleaned, "Cleaned");
                ui.separator();
                let max_first = raw.n_channels().saturating_sub(1);
                ui.add(egui::DragValue::new(&mut state.first_channel).clamp_range(0..=max_first).prefix("From channel "));
                ui.add(egui::Slider::new(&mut state.channels_shown, 1..=raw.n_channels().max(1)).text("shown"));
                ui.add(egui::Slider::new(&mut state.trace_spacing_uv, 10.0..=500.0).suffix(" µV").text("spacing"));
            }
            PlotMode::Components => {
                let n = outcome.ica().map(|ica| ica.n_components()).unwrap_or(1);
                ui.add(egui::DragValue::new(&mut state.first_component).clamp_range(0..=n.saturating_sub(1)).prefix("From "));
                ui.add(egui::Slider::new(&mut state.components_shown, 1..=n.max(1)).text("shown"));
            }
            PlotMode::Overlay => {
                let selected = raw
                    .info
                    .channels
                    .get(state.selected_channel)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                egui::ComboBox::from_id_source("overlay_channel")
                    .selected_text(selected)
                    .show_ui(ui, |ui| {
                        for (i, ch) in raw.info.channels.iter().enumerate() {
                            ui.selectable_value(&mut state.selected_channel, i, ch.name.as_str());
                        }
                    });
            }
            _ => {}
        });
    }
}

impl eframe::App for EegCleanApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.update_data();
        self.last_update = Instant::now();

        if self.busy {
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Open EDF...").clicked() {
                        if let Some(path) = rfd::FileDialog::new().add_filter("EDF", &["edf", "EDF"]).pick_file() {
                            self.source = InputSource::File(path);
                            self.run_pipeline();
                        }
                        ui.close_menu();
                    }
                    if ui.add_enabled(self.has_output() && !self.busy, egui::Button::new("Save Cleaned...")).clicked() {
                        self.save_output();
                        ui.close_menu();
                    }
                    if ui.button("Settings").clicked() {
                        self.ui_state.show_settings = !self.ui_state.show_settings;
                        ui.close_menu();
                    }
                });

                ui.menu_button("View", |ui| {
                    ui.checkbox(&mut self.ui_state.show_controls, "Show Controls");
                    ui.checkbox(&mut self.ui_state.show_stats, "Show Statistics");
                });

                ui.menu_button("Processing", |ui| {
                    if ui.add_enabled(!self.busy, egui::Button::new("Run")).clicked() {
                        self.run_pipeline();
                        ui.close_menu();
                    }
                    ui.separator();
                    ui.label("Profile:");
                    let current = self.config.profile;
                    for (profile, name) in [
                        (ProcessingProfile::Standard, "Standard"),
                        (ProcessingProfile::Quick, "Quick"),
                    ] {
                        if ui.radio(current == profile, name).clicked() && current != profile {
                            self.set_profile(profile);
                        }
                    }
                });

                ui.separator();

                let status_color = if self.busy {
                    egui::Color32::YELLOW
                } else if self.failure.is_some() {
                    egui::Color32::RED
                } else {
                    egui::Color32::GREEN
                };
                ui.colored_label(status_color, format!("● {}", self.status));

                ui.separator();
                ui.label(format!("Profile: {:?}", self.config.profile));
            });
        });

        if self.ui_state.show_controls {
            egui::SidePanel::left("control_panel")
                .resizable(true)
                .default_width(300.0)
                .show(ctx, |ui| {
                    egui::ScrollArea::vertical().show(ui, |ui| {
                        ControlPanel::show(ui, self);
                    });
                });
        }

        if self.ui_state.show_stats {
            egui::SidePanel::right("stats_panel")
                .resizable(true)
                .default_width(280.0)
                .show(ctx, |ui| {
                    egui::ScrollArea::vertical().show(ui, |ui| {
                        self.show_stats_panel(ui);
                    });
                });
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal(|ui| {
                for mode in PlotMode::ALL {
                    ui.selectable_value(&mut self.ui_state.plot_mode, mode, mode.label());
                }
            });
            self.show_view_controls(ui);
            ui.separator();

            let (Some(outcome), Some(plot_data)) = (self.outcome.as_ref(), self.plot_data.as_ref()) else {
                ui.vertical_centered(|ui| {
                    ui.add_space(200.0);
                    if self.busy {
                        ui.heading("Processing...");
                        ui.spinner();
                    } else {
                        ui.heading("No results yet");
                        ui.label("Choose an input and press Run");
                    }
                });
                return;
            };

            let state = &self.ui_state;
            match state.plot_mode {
                PlotMode::Layout => plot_data.show_layout(ui, &outcome.result.context.raw),
                PlotMode::Traces => {
                    let raw = match state.trace_view {
                        TraceView::Input => &outcome.input.raw,
                        TraceView::Filtered => &outcome.result.context.raw,
                        TraceView::Cleaned => outcome.result.output(),
                    };
                    plot_data.show_traces(ui, raw, state);
                }
                PlotMode::Components => plot_data.show_components(ui, outcome, state),
                PlotMode::Scores => plot_data.show_scores(ui, outcome),
                PlotMode::Evoked => plot_data.show_evoked(ui, outcome),
                PlotMode::Overlay => plot_data.show_overlay(ui, outcome, state),
            }
        });

        if self.ui_state.show_settings {
            let mut open = true;
            egui::Window::new("Settings")
                .open(&mut open)
                .resizable(true)
                .default_size([400.0, 300.0])
                .show(ctx, |ui| {
                    ui.heading("Filtering");
                    let max_jobs = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
                    ui.add(egui::Slider::new(&mut self.config.filter.n_jobs, 1..=max_jobs).text("Worker threads"));

                    ui.separator();
                    ui.heading("ICA");
                    ui.add(
                        egui::Slider::new(&mut self.config.ica.tol, 1e-6..=1e-2)
                            .logarithmic(true)
                            .text("Tolerance"),
                    );
                    ui.add(egui::Slider::new(&mut self.config.ica.tstep, 0.5..=10.0).suffix(" s").text("Rejection step"));

                    ui.separator();
                    ui.heading("Configuration");
                    match self.config.to_json() {
                        Ok(json) => {
                            egui::ScrollArea::vertical().max_height(200.0).show(ui, |ui| {
                                ui.monospace(json);
                            });
                        }
                        Err(e) => {
                            ui.colored_label(egui::Color32::RED, e.to_string());
                        }
                    }
                });
            self.ui_state.show_settings = open;
        }
    }
}

impl Drop for EegCleanApp {
    fn drop(&mut self) {
        if self.command_sender.try_send(ProcessingCommand::Shutdown).is_err() {
            warn!("Processing service already stopped");
        }
        // Let a pending save finish before the runtime goes away
        self.runtime.block_on(tokio::time::sleep(Duration::from_millis(50)));
    }
}
