//! UI state, plots and the parameter panel

use crate::app::EegCleanApp;
use crate::processing_service::{InputSource, RunOutcome};
use eegclean_core::layout::HEAD_RADIUS;
use eegclean_core::{ChannelType, Layout, RawRecording};
use eegclean_processing::ProcessingProfile;
use egui_plot::{Bar, BarChart, Corner, Legend, Line, Plot, PlotPoint, PlotPoints, Points, Polygon, Text, VLine};

const EEG_COLOR: egui::Color32 = egui::Color32::from_rgb(100, 150, 255);
const EOG_COLOR: egui::Color32 = egui::Color32::from_rgb(100, 220, 120);
const BAD_COLOR: egui::Color32 = egui::Color32::from_rgb(255, 100, 100);
const CLEAN_COLOR: egui::Color32 = egui::Color32::from_rgb(255, 180, 60);
const MUTED_COLOR: egui::Color32 = egui::Color32::from_rgb(150, 150, 150);

/// Main plot area tabs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotMode {
    Layout,
    Traces,
    Components,
    Scores,
    Evoked,
    Overlay,
}

impl PlotMode {
    pub const ALL: [PlotMode; 6] = [
        PlotMode::Layout,
        PlotMode::Traces,
        PlotMode::Components,
        PlotMode::Scores,
        PlotMode::Evoked,
        PlotMode::Overlay,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PlotMode::Layout => "Sensor Layout",
            PlotMode::Traces => "Traces",
            PlotMode::Components => "ICA Sources",
            PlotMode::Scores => "EOG Scores",
            PlotMode::Evoked => "EOG Evoked",
            PlotMode::Overlay => "Before / After",
        }
    }
}

/// Which version of the recording the trace view shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceView {
    Input,
    Filtered,
    Cleaned,
}

/// UI state management
#[derive(Debug)]
pub struct UIState {
    // Panel visibility
    pub show_controls: bool,
    pub show_stats: bool,
    pub show_settings: bool,

    pub plot_mode: PlotMode,
    pub trace_view: TraceView,

    // Time window shared by the trace, source and overlay plots
    pub window_start: f64,
    pub window_duration: f64,

    /// First channel of the stacked trace view
    pub first_channel: usize,
    pub channels_shown: usize,
    /// Vertical distance between stacked traces, in µV
    pub trace_spacing_uv: f64,

    pub first_component: usize,
    pub components_shown: usize,

    /// Channel for the before/after overlay
    pub selected_channel: usize,
    pub show_blink_markers: bool,

    // Text fields in the control panel
    pub bads_text: String,
    pub eog_channel_text: String,
}

impl UIState {
    pub fn new() -> Self {
        Self {
            show_controls: true,
            show_stats: true,
            show_settings: false,

            plot_mode: PlotMode::Traces,
            trace_view: TraceView::Cleaned,

            window_start: 0.0,
            window_duration: 10.0,

            first_channel: 0,
            channels_shown: 16,
            trace_spacing_uv: 80.0,

            first_component: 0,
            components_shown: 10,

            selected_channel: 0,
            show_blink_markers: true,

            bads_text: String::new(),
            eog_channel_text: String::new(),
        }
    }

    /// Sample range of the current time window
    fn window_samples(&self, raw: &RawRecording) -> (usize, usize) {
        let n = raw.n_samples();
        let start = ((self.window_start.max(0.0) * raw.sfreq()) as usize).min(n);
        let stop = (start + (self.window_duration * raw.sfreq()) as usize).min(n);
        (start, stop)
    }
}

impl Default for UIState {
    fn default() -> Self {
        Self::new()
    }
}

/// Derived data for plotting one run
pub struct PlotData {
    layout: Layout,
    /// Standard deviation of each component, for normalised display
    source_scale: Vec<f64>,
    blink_times: Vec<f64>,
    event_times: Vec<f64>,
}

impl PlotData {
    pub fn new(outcome: &RunOutcome) -> Self {
        let raw = &outcome.result.context.raw;
        let sfreq = raw.sfreq();

        let source_scale = outcome
            .sources
            .as_ref()
            .map(|sources| {
                sources
                    .rows()
                    .into_iter()
                    .map(|row| {
                        let std = row.std(0.0);
                        if std > 0.0 {
                            std
                        } else {
                            1.0
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let event_times = outcome
            .result
            .context
            .eog
            .as_ref()
            .map(|eog| eog.events.iter().map(|e| e.sample as f64 / sfreq).collect())
            .unwrap_or_default();

        Self {
            layout: Layout::for_info(&raw.info),
            source_scale,
            blink_times: outcome.input.blink_samples.iter().map(|&s| s as f64 / sfreq).collect(),
            event_times,
        }
    }

    /// Head outline with sensor positions
    pub fn show_layout(&self, ui: &mut egui::Ui, raw: &RawRecording) {
        ui.heading(format!("{} sensors", self.layout.len()));

        Plot::new("layout_plot")
            .data_aspect(1.0)
            .show_axes(false)
            .show_grid(false)
            .allow_drag(false)
            .allow_zoom(false)
            .legend(Legend::default().position(Corner::RightBottom))
            .show(ui, |plot_ui| {
                let outline: PlotPoints = (0..=100)
                    .map(|i| {
                        let a = 2.0 * std::f64::consts::PI * i as f64 / 100.0;
                        [HEAD_RADIUS * a.cos(), HEAD_RADIUS * a.sin()]
                    })
                    .collect();
                plot_ui.line(Line::new(outline).color(MUTED_COLOR));

                let nose = vec![
                    [-0.08, HEAD_RADIUS - 0.01],
                    [0.0, HEAD_RADIUS + 0.1],
                    [0.08, HEAD_RADIUS - 0.01],
                ];
                plot_ui.polygon(Polygon::new(PlotPoints::new(nose)).stroke(egui::Stroke::new(1.0, MUTED_COLOR)));

                let mut eeg = Vec::new();
                let mut eog = Vec::new();
                let mut bad = Vec::new();
                for pos in &self.layout.positions {
                    let point = [pos.x, pos.y];
                    if raw.info.is_bad(&pos.name) {
                        bad.push(point);
                    } else if raw.channel_index(&pos.name).ok().map(|i| raw.info.channels[i].kind)
                        == Some(ChannelType::Eog)
                    {
                        eog.push(point);
                    } else {
                        eeg.push(point);
                    }
                    plot_ui.text(Text::new(PlotPoint::new(pos.x, pos.y - 0.05), pos.name.as_str()).color(MUTED_COLOR));
                }

                plot_ui.points(Points::new(eeg).radius(5.0).color(EEG_COLOR).name("EEG"));
                plot_ui.points(Points::new(eog).radius(5.0).color(EOG_COLOR).name("EOG"));
                plot_ui.points(Points::new(bad).radius(5.0).color(BAD_COLOR).name("bad"));
            });
    }

    /// Stacked channel traces in µV
    pub fn show_traces(&self, ui: &mut egui::Ui, raw: &RawRecording, ui_state: &UIState) {
        let (start, stop) = ui_state.window_samples(raw);
        let last = (ui_state.first_channel + ui_state.channels_shown).min(raw.n_channels());
        let sfreq = raw.sfreq();

        Plot::new("traces_plot")
            .show_axes([true, false])
            .allow_scroll(false)
            .show(ui, |plot_ui| {
                for (row, ch) in (ui_state.first_channel..last).enumerate() {
                    let offset = -(row as f64) * ui_state.trace_spacing_uv;
                    let name = &raw.info.channels[ch].name;
                    let color = if raw.info.is_bad(name) {
                        BAD_COLOR
                    } else if raw.info.channels[ch].kind == ChannelType::Eog {
                        EOG_COLOR
                    } else {
                        EEG_COLOR
                    };

                    let data = raw.data.row(ch);
                    let points: PlotPoints = (start..stop)
                        .map(|i| [i as f64 / sfreq, data[i] * 1e6 + offset])
                        .collect();
                    plot_ui.line(Line::new(points).color(color).name(name));
                    plot_ui.text(
                        Text::new(PlotPoint::new(start as f64 / sfreq, offset + 0.3 * ui_state.trace_spacing_uv), name.as_str())
                            .anchor(egui::Align2::LEFT_BOTTOM),
                    );
                }

                if ui_state.show_blink_markers {
                    self.markers(plot_ui, start as f64 / sfreq, stop as f64 / sfreq);
                }
            });
    }

    /// Component time courses, each scaled to unit variance
    pub fn show_components(&self, ui: &mut egui::Ui, outcome: &RunOutcome, ui_state: &UIState) {
        let (Some(sources), Some(ica)) = (outcome.sources.as_ref(), outcome.ica()) else {
            ui.label("No decomposition in this run");
            return;
        };
        let raw = &outcome.result.context.raw;
        let (start, stop) = ui_state.window_samples(raw);
        let last = (ui_state.first_component + ui_state.components_shown).min(sources.nrows());
        let sfreq = raw.sfreq();

        Plot::new("components_plot")
            .show_axes([true, false])
            .allow_scroll(false)
            .show(ui, |plot_ui| {
                for (row, comp) in (ui_state.first_component..last).enumerate() {
                    let offset = -(row as f64) * 8.0;
                    let scale = self.source_scale.get(comp).copied().unwrap_or(1.0);
                    let excluded = ica.exclude.contains(&comp);
                    let data = sources.row(comp);

                    let points: PlotPoints = (start..stop)
                        .map(|i| [i as f64 / sfreq, data[i] / scale + offset])
                        .collect();
                    let label = component_label(comp);
                    plot_ui.line(
                        Line::new(points)
                            .color(if excluded { BAD_COLOR } else { EEG_COLOR })
                            .name(&label),
                    );
                    plot_ui.text(
                        Text::new(PlotPoint::new(start as f64 / sfreq, offset + 2.5), label).anchor(egui::Align2::LEFT_BOTTOM),
                    );
                }

                if ui_state.show_blink_markers {
                    self.markers(plot_ui, start as f64 / sfreq, stop as f64 / sfreq);
                }
            });
    }

    /// Correlation of every component with the EOG channel
    pub fn show_scores(&self, ui: &mut egui::Ui, outcome: &RunOutcome) {
        let (Some(eog), Some(ica)) = (outcome.result.context.eog.as_ref(), outcome.ica()) else {
            ui.label("No EOG scores in this run");
            return;
        };

        ui.label(format!(
            "Correlation with {}. Excluded: {}",
            eog.channel,
            if ica.exclude.is_empty() {
                "none".to_string()
            } else {
                ica.exclude.iter().map(|&c| component_label(c)).collect::<Vec<_>>().join(", ")
            }
        ));

        let bars: Vec<Bar> = eog
            .scores
            .iter()
            .enumerate()
            .map(|(comp, &score)| {
                Bar::new(comp as f64, score)
                    .name(component_label(comp))
                    .fill(if ica.exclude.contains(&comp) { BAD_COLOR } else { MUTED_COLOR })
            })
            .collect();

        Plot::new("scores_plot")
            .include_y(-1.0)
            .include_y(1.0)
            .allow_drag(false)
            .show(ui, |plot_ui| {
                plot_ui.bar_chart(BarChart::new(bars).width(0.7).name("score"));
            });
    }

    /// Average over EOG epochs, every channel in µV
    pub fn show_evoked(&self, ui: &mut egui::Ui, outcome: &RunOutcome) {
        let Some(evoked) = outcome.result.context.eog.as_ref().and_then(|eog| eog.evoked.as_ref()) else {
            ui.label("No EOG epochs in this run");
            return;
        };

        let peak = evoked
            .peak()
            .map(|(ch, t)| format!(", peak on {} at {:.3} s", evoked.info.channels[ch].name, t))
            .unwrap_or_default();
        ui.label(format!("{} epochs averaged{}", evoked.nave, peak));

        let times = evoked.times();
        Plot::new("evoked_plot")
            .legend(Legend::default().position(Corner::RightTop))
            .show(ui, |plot_ui| {
                for (ch, info) in evoked.info.channels.iter().enumerate() {
                    let row = evoked.data.row(ch);
                    let points: PlotPoints = times.iter().zip(row.iter()).map(|(&t, &v)| [t, v * 1e6]).collect();
                    let color = if info.kind == ChannelType::Eog { EOG_COLOR } else { EEG_COLOR };
                    plot_ui.line(Line::new(points).color(color).name(&info.name));
                }
                plot_ui.vline(VLine::new(0.0).color(MUTED_COLOR));
            });
    }

    /// Filtered versus cleaned signal on one channel
    pub fn show_overlay(&self, ui: &mut egui::Ui, outcome: &RunOutcome, ui_state: &UIState) {
        let before = &outcome.result.context.raw;
        let Some(after) = outcome.result.context.cleaned.as_ref() else {
            ui.label("No cleaned recording in this run");
            return;
        };
        let ch = ui_state.selected_channel.min(before.n_channels().saturating_sub(1));
        let (start, stop) = ui_state.window_samples(before);
        let sfreq = before.sfreq();

        let line = |raw: &RawRecording| -> PlotPoints {
            let data = raw.data.row(ch);
            (start..stop).map(|i| [i as f64 / sfreq, data[i] * 1e6]).collect()
        };

        ui.label(format!("{} (µV)", before.info.channels[ch].name));
        Plot::new("overlay_plot")
            .legend(Legend::default().position(Corner::LeftTop))
            .show(ui, |plot_ui| {
                plot_ui.line(Line::new(line(before)).color(MUTED_COLOR).name("before"));
                plot_ui.line(Line::new(line(after)).color(CLEAN_COLOR).name("after"));
                if ui_state.show_blink_markers {
                    self.markers(plot_ui, start as f64 / sfreq, stop as f64 / sfreq);
                }
            });
    }

    /// Simulated blinks and detected EOG events inside `[t0, t1)`
    fn markers(&self, plot_ui: &mut egui_plot::PlotUi, t0: f64, t1: f64) {
        for &t in self.blink_times.iter().filter(|&&t| t >= t0 && t < t1) {
            plot_ui.vline(VLine::new(t).color(EOG_COLOR.linear_multiply(0.4)));
        }
        for &t in self.event_times.iter().filter(|&&t| t >= t0 && t < t1) {
            plot_ui.vline(VLine::new(t).color(BAD_COLOR.linear_multiply(0.4)));
        }
    }
}

fn component_label(comp: usize) -> String {
    format!("ICA{:03}", comp)
}

/// Parameter and input controls
pub struct ControlPanel;

impl ControlPanel {
    pub fn show(ui: &mut egui::Ui, app: &mut EegCleanApp) {
        ui.heading("Cleaning Controls");
        ui.separator();

        ui.group(|ui| {
            ui.label("Input");
            ui.label(app.source.to_string());

            ui.horizontal(|ui| {
                if ui.button("Open EDF...").clicked() {
                    if let Some(path) = rfd::FileDialog::new().add_filter("EDF", &["edf", "EDF"]).pick_file() {
                        app.source = InputSource::File(path);
                    }
                }
                if ui.button("Simulate").clicked() {
                    app.source = InputSource::default();
                }
            });

            if let InputSource::Simulated { duration, seed } = &mut app.source {
                ui.add(egui::Slider::new(duration, 10.0..=300.0).suffix(" s").text("Duration"));
                let mut seed_value = seed.unwrap_or(0);
                if ui.add(egui::DragValue::new(&mut seed_value).prefix("Seed: ")).changed() {
                    *seed = Some(seed_value);
                }
            }
        });

        ui.separator();

        ui.group(|ui| {
            ui.label("Profile");
            let current = app.config.profile;
            ui.horizontal(|ui| {
                for (profile, name) in [
                    (ProcessingProfile::Standard, "Standard"),
                    (ProcessingProfile::Quick, "Quick"),
                ] {
                    if ui.selectable_label(current == profile, name).clicked() && current != profile {
                        app.set_profile(profile);
                    }
                }
            });
        });

        ui.separator();

        ui.group(|ui| {
            ui.label("Channels");
            ui.horizontal(|ui| {
                ui.label("Bads:");
                ui.text_edit_singleline(&mut app.ui_state.bads_text);
            });
            ui.horizontal(|ui| {
                ui.label("EOG:");
                ui.text_edit_singleline(&mut app.ui_state.eog_channel_text);
            });
            ui.small("Comma-separated names. Empty EOG uses the first EOG channel.");
        });

        ui.separator();

        ui.group(|ui| {
            ui.label("Bandpass");
            let filter = &mut app.config.filter;

            let mut highpass_on = filter.l_freq.is_some();
            if ui.checkbox(&mut highpass_on, "Highpass").changed() {
                filter.l_freq = highpass_on.then_some(1.0);
            }
            if let Some(l) = filter.l_freq.as_mut() {
                ui.add(egui::Slider::new(l, 0.1..=5.0).logarithmic(true).suffix(" Hz"));
            }

            let mut lowpass_on = filter.h_freq.is_some();
            if ui.checkbox(&mut lowpass_on, "Lowpass").changed() {
                filter.h_freq = lowpass_on.then_some(40.0);
            }
            if let Some(h) = filter.h_freq.as_mut() {
                ui.add(egui::Slider::new(h, 10.0..=100.0).suffix(" Hz"));
            }
        });

        ui.separator();

        ui.group(|ui| {
            ui.label("ICA");
            let ica = &mut app.config.ica;
            ui.add(egui::Slider::new(&mut ica.n_components, 2..=64).text("Components"));
            ui.add(egui::Slider::new(&mut ica.decim, 1..=10).text("Decimation"));
            ui.add(egui::Slider::new(&mut ica.max_iter, 50..=1000).text("Max iterations"));

            let mut reject_on = ica.reject.is_some();
            if ui.checkbox(&mut reject_on, "Reject segments").changed() {
                ica.reject = reject_on.then_some(2e-4);
            }
            if let Some(reject) = ica.reject.as_mut() {
                let mut uv = *reject * 1e6;
                if ui.add(egui::Slider::new(&mut uv, 50.0..=1000.0).suffix(" µV")).changed() {
                    *reject = uv * 1e-6;
                }
            }
        });

        ui.separator();

        ui.group(|ui| {
            ui.label("EOG detection");
            ui.add(egui::Slider::new(&mut app.config.eog.threshold, 1.0..=6.0).text("z threshold"));
            ui.add(egui::Slider::new(&mut app.config.eog.tmin, -1.0..=0.0).suffix(" s").text("tmin"));
            ui.add(egui::Slider::new(&mut app.config.eog.tmax, 0.0..=1.0).suffix(" s").text("tmax"));
        });

        ui.separator();

        ui.horizontal(|ui| {
            let busy = app.is_busy();
            if ui.add_enabled(!busy, egui::Button::new("▶ Run")).clicked() {
                app.run_pipeline();
            }
            if ui
                .add_enabled(!busy && app.has_output(), egui::Button::new("💾 Save..."))
                .clicked()
            {
                app.save_output();
            }
            if busy {
                ui.spinner();
            }
        });

        ui.separator();

        ui.group(|ui| {
            ui.label("View");
            ui.horizontal(|ui| {
                ui.label("Start:");
                ui.add(egui::DragValue::new(&mut app.ui_state.window_start).speed(0.5).suffix(" s"));
            });
            ui.add(egui::Slider::new(&mut app.ui_state.window_duration, 1.0..=60.0).suffix(" s").text("Window"));
            ui.checkbox(&mut app.ui_state.show_blink_markers, "Blink markers");
        });

        ui.separator();
        ui.collapsing("Help", |ui| {
            ui.label("Green markers are simulated blinks, red markers detected EOG events.");
            ui.label("Excluded components are drawn in red.");
            ui.label("Run applies the parameters above to the selected input.");
        });
    }
}
