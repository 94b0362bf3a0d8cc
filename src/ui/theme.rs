use egui::{Color32, FontFamily, FontId, Rounding, Stroke, Style, TextStyle, Visuals};

pub const BG_PURE_BLACK: Color32 = Color32::from_rgb(0, 0, 0);
pub const BG_PANEL: Color32 = Color32::from_rgb(8, 6, 6);
pub const BG_WIDGET: Color32 = Color32::from_rgb(20, 16, 15);
pub const BG_WIDGET_HOVER: Color32 = Color32::from_rgb(34, 26, 24);
pub const BG_WIDGET_ACTIVE: Color32 = Color32::from_rgb(48, 36, 32);

pub const TEXT_PRIMARY: Color32 = Color32::from_rgb(168, 168, 171);
pub const TEXT_MUTED: Color32 = Color32::from_rgb(107, 107, 112);
pub const TEXT_BRIGHT: Color32 = Color32::from_rgb(220, 220, 225);

pub const ACCENT_GREEN: Color32 = Color32::from_rgb(46, 172, 35);
pub const ACCENT_RED: Color32 = Color32::from_rgb(196, 52, 40);
pub const ACCENT_BLUE: Color32 = Color32::from_rgb(51, 51, 204);
pub const ACCENT_AMBER: Color32 = Color32::from_rgb(255, 217, 51);
pub const ACCENT_ORANGE: Color32 = Color32::from_rgb(196, 128, 36);

pub const BORDER_SUBTLE: Color32 = Color32::from_rgba_premultiplied(60, 40, 30, 77);
pub const BORDER_ACCENT: Color32 = Color32::from_rgb(196, 52, 40);

fn widget(
    bg_fill: Color32,
    weak_bg_fill: Color32,
    border: Color32,
    border_width: f32,
    text: Color32,
    expansion: f32,
) -> egui::style::WidgetVisuals {
    egui::style::WidgetVisuals {
        bg_fill,
        weak_bg_fill,
        bg_stroke: Stroke::new(border_width, border),
        rounding: Rounding::same(2.0),
        fg_stroke: Stroke::new(1.0, text),
        expansion,
    }
}

/// Dark theme with the DRR palette: red for the density image, amber for
/// silhouettes, blue for the frustum.
pub fn apply_theme(ctx: &egui::Context) {
    let mut visuals = Visuals::dark();
    visuals.override_text_color = Some(TEXT_PRIMARY);
    visuals.widgets = egui::style::Widgets {
        noninteractive: widget(BG_WIDGET, BG_PANEL, BORDER_SUBTLE, 1.0, TEXT_MUTED, 0.0),
        inactive: widget(BG_WIDGET, BG_WIDGET, BORDER_SUBTLE, 1.0, TEXT_PRIMARY, 0.0),
        hovered: widget(BG_WIDGET_HOVER, BG_WIDGET_HOVER, BORDER_ACCENT, 1.0, TEXT_BRIGHT, 1.0),
        active: widget(BG_WIDGET_ACTIVE, BG_WIDGET_ACTIVE, ACCENT_AMBER, 2.0, TEXT_BRIGHT, 1.0),
        open: widget(BG_WIDGET_ACTIVE, BG_WIDGET_ACTIVE, BORDER_ACCENT, 1.0, TEXT_BRIGHT, 0.0),
    };
    visuals.selection = egui::style::Selection {
        bg_fill: ACCENT_AMBER.gamma_multiply(0.4),
        stroke: Stroke::new(1.0, ACCENT_AMBER),
    };
    visuals.hyperlink_color = ACCENT_BLUE;
    visuals.faint_bg_color = BG_PANEL;
    visuals.extreme_bg_color = BG_PURE_BLACK;
    visuals.code_bg_color = BG_PURE_BLACK;
    visuals.warn_fg_color = ACCENT_ORANGE;
    visuals.error_fg_color = ACCENT_RED;
    visuals.window_rounding = Rounding::same(2.0);
    visuals.menu_rounding = Rounding::same(2.0);
    visuals.window_fill = BG_PANEL;
    visuals.window_stroke = Stroke::new(1.0, BORDER_SUBTLE);
    visuals.panel_fill = BG_PANEL;
    visuals.text_cursor.stroke = Stroke::new(2.0, ACCENT_AMBER);
    visuals.slider_trailing_fill = true;
    visuals.handle_shape = egui::style::HandleShape::Circle;

    let mut style = Style {
        visuals,
        ..Style::default()
    };

    style.spacing.item_spacing = egui::vec2(8.0, 6.0);
    style.spacing.window_margin = egui::Margin::same(12.0);
    style.spacing.button_padding = egui::vec2(8.0, 4.0);
    style.spacing.slider_width = 180.0;

    style.text_styles = [
        (TextStyle::Small, FontId::new(11.0, FontFamily::Proportional)),
        (TextStyle::Body, FontId::new(13.0, FontFamily::Proportional)),
        (TextStyle::Button, FontId::new(13.0, FontFamily::Proportional)),
        (TextStyle::Heading, FontId::new(17.0, FontFamily::Proportional)),
        (TextStyle::Monospace, FontId::new(12.0, FontFamily::Monospace)),
    ]
    .into();

    ctx.set_style(style);
}
