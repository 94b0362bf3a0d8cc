use ssim_renderer::RenderSettings;

pub struct UiState {
    pub density: bool,
    pub silhouettes: bool,
    pub polygonal: bool,
    pub pyramid: bool,
    pub x_mirroring: bool,
    pub polygonal_lighting: bool,

    pub intensity: f32,
    pub line_width: f32,

    pub shape_pcs: Vec<f32>,
    pub density_pcs: Vec<f32>,

    pub rotation: [f32; 3],
    pub translation: [f32; 3],

    pub render_size: u32,
    pub show_stats: bool,
}

impl UiState {
    pub fn new(shape_modes: usize, density_modes: usize) -> Self {
        let settings = RenderSettings::default();
        Self {
            density: settings.density,
            silhouettes: settings.silhouettes,
            polygonal: settings.polygonal,
            pyramid: settings.pyramid,
            x_mirroring: settings.x_mirroring,
            polygonal_lighting: settings.polygonal_lighting,

            intensity: settings.intensity,
            line_width: settings.line_width,

            shape_pcs: vec![0.0; shape_modes],
            density_pcs: vec![0.0; density_modes],

            rotation: [0.0; 3],
            translation: [0.0; 3],

            render_size: settings.render_width,
            show_stats: true,
        }
    }

    pub fn reset_pose(&mut self) {
        self.rotation = [0.0; 3];
        self.translation = [0.0; 3];
    }
}

impl Default for UiState {
    fn default() -> Self {
        Self::new(0, 0)
    }
}
