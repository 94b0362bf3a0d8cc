use egui::{Color32, Context, RichText, ScrollArea, Ui};

use crate::ui::state::UiState;
use crate::ui::theme::*;

#[derive(Default)]
pub struct UiActions {
    pub settings_changed: bool,
    pub shape_changed: bool,
    pub density_changed: bool,
    pub pose_changed: bool,
    pub render_size_changed: bool,
    pub reset_camera: bool,
    pub save_image: bool,
    pub export_stl: bool,
}

/// Numbers shown in the statistics box.
#[derive(Clone, Copy, Default)]
pub struct FrameStats {
    pub fps: f32,
    pub render_ms: f64,
    pub vertices: usize,
    pub tetrahedra: usize,
}

pub fn draw_side_panel(ctx: &Context, state: &mut UiState, stats: &FrameStats) -> UiActions {
    let mut actions = UiActions::default();

    egui::SidePanel::right("control_panel")
        .min_width(300.0)
        .max_width(400.0)
        .default_width(320.0)
        .frame(egui::Frame::default().fill(BG_PANEL).inner_margin(16.0))
        .show(ctx, |ui| {
            ScrollArea::vertical().show(ui, |ui| {
                ui.heading(RichText::new("SSIM Viewer").strong());
                ui.add_space(4.0);
                ui.label(RichText::new("Statistical shape and intensity model DRRs").color(TEXT_MUTED).size(11.0));
                ui.add_space(16.0);

                section_header(ui, "LAYERS");
                let mut changed = false;
                ui.horizontal(|ui| {
                    changed |= layer_toggle(ui, &mut state.density, "Density", ACCENT_RED);
                    changed |= layer_toggle(ui, &mut state.silhouettes, "Silhouettes", ACCENT_AMBER);
                });
                ui.horizontal(|ui| {
                    changed |= layer_toggle(ui, &mut state.polygonal, "Polygonal", ACCENT_GREEN);
                    changed |= layer_toggle(ui, &mut state.pyramid, "Frustum", ACCENT_BLUE);
                });
                ui.add_space(8.0);
                changed |= ui.checkbox(&mut state.x_mirroring, "Mirror x").changed();
                changed |= ui
                    .add_enabled(state.polygonal, egui::Checkbox::new(&mut state.polygonal_lighting, "Lighting"))
                    .changed();
                ui.add_space(8.0);

                ui.horizontal(|ui| {
                    ui.label("Intensity:");
                    changed |= ui.add(egui::Slider::new(&mut state.intensity, 0.0..=1.0)).changed();
                });
                ui.horizontal(|ui| {
                    ui.label("Line width:");
                    changed |= ui.add(egui::Slider::new(&mut state.line_width, 1.0..=9.0).step_by(1.0)).changed();
                });
                actions.settings_changed = changed;
                ui.add_space(16.0);

                ui.separator();
                ui.add_space(12.0);

                section_header(ui, "SHAPE MODES");
                actions.shape_changed = mode_sliders(ui, "shape", &mut state.shape_pcs);
                ui.add_space(12.0);

                section_header(ui, "DENSITY MODES");
                actions.density_changed = mode_sliders(ui, "density", &mut state.density_pcs);
                ui.add_space(16.0);

                ui.separator();
                ui.add_space(12.0);

                section_header(ui, "POSE");
                actions.pose_changed = pose_grid(ui, &mut state.rotation, &mut state.translation);
                ui.add_space(4.0);
                ui.horizontal(|ui| {
                    if ui.button("Reset pose").clicked() {
                        state.reset_pose();
                        actions.pose_changed = true;
                    }
                    if ui.button("Reset camera").clicked() {
                        actions.reset_camera = true;
                    }
                });
                ui.add_space(16.0);

                section_header(ui, "OUTPUT");
                ui.horizontal(|ui| {
                    ui.label("Render size:");
                    actions.render_size_changed = ui
                        .add(egui::Slider::new(&mut state.render_size, 64..=2048).suffix("px").logarithmic(true))
                        .changed();
                });
                ui.horizontal(|ui| {
                    if ui.button("Save PNG").clicked() {
                        actions.save_image = true;
                    }
                    if ui.button("Export STL").clicked() {
                        actions.export_stl = true;
                    }
                    ui.checkbox(&mut state.show_stats, "Stats");
                });
                ui.add_space(16.0);

                if state.show_stats {
                    ui.separator();
                    ui.add_space(12.0);
                    stats_panel(ui, stats);
                }
            });
        });

    actions
}

fn section_header(ui: &mut Ui, text: &str) {
    ui.label(RichText::new(text).color(TEXT_MUTED).size(11.0).strong());
    ui.add_space(4.0);
}

fn layer_toggle(ui: &mut Ui, enabled: &mut bool, label: &str, accent: Color32) -> bool {
    let button = egui::Button::new(RichText::new(label).color(if *enabled { BG_PURE_BLACK } else { TEXT_PRIMARY }))
        .fill(if *enabled { accent } else { BG_WIDGET })
        .min_size(egui::vec2(110.0, 28.0));
    let clicked = ui.add(button).clicked();
    if clicked {
        *enabled = !*enabled;
    }
    clicked
}

fn mode_sliders(ui: &mut Ui, id: &str, pcs: &mut [f32]) -> bool {
    if pcs.is_empty() {
        ui.label(RichText::new("No modes").color(TEXT_MUTED).italics());
        return false;
    }

    let mut changed = false;
    egui::Grid::new(id).num_columns(2).spacing([8.0, 4.0]).show(ui, |ui| {
        for (i, value) in pcs.iter_mut().enumerate() {
            ui.label(format!("#{}", i + 1));
            changed |= ui.add(egui::Slider::new(value, -1.0..=1.0).step_by(0.01)).changed();
            ui.end_row();
        }
    });
    if ui.small_button("Zero").clicked() {
        pcs.fill(0.0);
        changed = true;
    }
    changed
}

fn pose_grid(ui: &mut Ui, rotation: &mut [f32; 3], translation: &mut [f32; 3]) -> bool {
    let mut changed = false;
    egui::Grid::new("pose").num_columns(3).spacing([8.0, 4.0]).show(ui, |ui| {
        ui.label("");
        ui.label(RichText::new("Rotation").color(TEXT_MUTED).size(10.0));
        ui.label(RichText::new("Translation").color(TEXT_MUTED).size(10.0));
        ui.end_row();

        for (i, label) in ["X", "Y", "Z"].iter().enumerate() {
            ui.label(*label);
            changed |= ui
                .add(egui::DragValue::new(&mut rotation[i]).speed(0.5).suffix("°"))
                .changed();
            changed |= ui.add(egui::DragValue::new(&mut translation[i]).speed(1.0)).changed();
            ui.end_row();
        }
    });
    changed
}

fn stats_panel(ui: &mut Ui, stats: &FrameStats) {
    section_header(ui, "STATISTICS");
    egui::Frame::default()
        .fill(BG_WIDGET)
        .stroke(egui::Stroke::new(1.0, BORDER_SUBTLE))
        .rounding(2.0)
        .inner_margin(12.0)
        .show(ui, |ui| {
            ui.style_mut().override_font_id = Some(egui::FontId::new(11.0, egui::FontFamily::Monospace));

            let fps_color = if stats.fps >= 60.0 {
                ACCENT_GREEN
            } else if stats.fps >= 30.0 {
                ACCENT_ORANGE
            } else {
                ACCENT_RED
            };

            egui::Grid::new("stats").num_columns(2).spacing([20.0, 4.0]).show(ui, |ui| {
                ui.label(RichText::new("FPS").color(TEXT_MUTED));
                ui.label(RichText::new(format!("{:.0}", stats.fps)).color(fps_color));
                ui.end_row();

                ui.label(RichText::new("Render ms").color(TEXT_MUTED));
                ui.label(RichText::new(format!("{:.2}", stats.render_ms)).color(TEXT_PRIMARY));
                ui.end_row();

                ui.label(RichText::new("Vertices").color(TEXT_MUTED));
                ui.label(RichText::new(fmt_num(stats.vertices)).color(TEXT_PRIMARY));
                ui.end_row();

                ui.label(RichText::new("Tetrahedra").color(TEXT_MUTED));
                ui.label(RichText::new(fmt_num(stats.tetrahedra)).color(TEXT_PRIMARY));
                ui.end_row();
            });
        });
}

pub fn draw_help_overlay(ctx: &Context, eye: [f32; 3]) {
    egui::Area::new(egui::Id::new("help_overlay"))
        .anchor(egui::Align2::LEFT_BOTTOM, egui::vec2(12.0, -12.0))
        .show(ctx, |ui| {
            egui::Frame::default()
                .fill(Color32::from_black_alpha(180))
                .rounding(2.0)
                .inner_margin(10.0)
                .show(ui, |ui| {
                    ui.style_mut().override_font_id = Some(egui::FontId::new(11.0, egui::FontFamily::Monospace));
                    ui.label(RichText::new("RMB+Drag - Orbit | Scroll - Dolly | R - Reset").color(TEXT_MUTED));
                    ui.label(RichText::new(format!("Eye: ({:.0}, {:.0}, {:.0})", eye[0], eye[1], eye[2])).color(TEXT_MUTED));
                });
        });
}

fn fmt_num(n: usize) -> String {
    if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        format!("{}", n)
    }
}
