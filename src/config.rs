/// Immutable configuration handed to GPU context creation.
///
/// A tree of render surfaces is created from the root's config; children
/// reuse the root context and ignore their own copy.
#[derive(Clone, Debug)]
pub struct ContextConfig {
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
    pub required_features: wgpu::Features,
    pub required_limits: wgpu::Limits,
    pub memory_hints: wgpu::MemoryHints,
    /// When set, shader compile failures are logged with the full compiler
    /// diagnostic before the error is returned.
    pub log_shader_diagnostics: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            log_shader_diagnostics: true,
        }
    }
}

impl ContextConfig {
    /// Default config with `WGPU_BACKEND` and `WGPU_POWER_PREF` applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(backends) = wgpu::util::backend_bits_from_env() {
            config.backends = backends;
        }
        if let Some(power_preference) = wgpu::util::power_preference_from_env() {
            config.power_preference = power_preference;
        }
        config
    }

    pub fn with_fallback_adapter(mut self, force: bool) -> Self {
        self.force_fallback_adapter = force;
        self
    }
}

/// Per-surface render settings. Every surface starts from these values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderSettings {
    pub density: bool,
    pub silhouettes: bool,
    pub pyramid: bool,
    pub polygonal: bool,
    pub x_mirroring: bool,
    pub polygonal_lighting: bool,

    pub intensity: f32,
    pub line_width: f32,
    pub param: f32,

    pub render_width: u32,
    pub render_height: u32,

    pub share_transformations: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            density: true,
            silhouettes: true,
            pyramid: true,
            polygonal: false,
            x_mirroring: false,
            polygonal_lighting: true,

            intensity: 0.5,
            line_width: 1.0,
            param: 1.0,

            render_width: 512,
            render_height: 512,

            share_transformations: true,
        }
    }
}

impl RenderSettings {
    /// Divisor applied to the clamped intensity before it reaches the
    /// composite stage.
    pub const INTENSITY_DIVISOR: f32 = 5000.0;

    pub fn clamp_intensity(value: f32) -> f32 {
        value.clamp(0.0, 1.0)
    }

    pub fn clamp_line_width(value: f32) -> f32 {
        value.max(1.0)
    }

    pub fn intensity_scale(&self) -> f32 {
        self.intensity / Self::INTENSITY_DIVISOR
    }

    /// Silhouette dilation radius in texels.
    pub fn line_radius(&self) -> u32 {
        (self.line_width / 2.0).floor() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn defaults_match_layer_policy() {
        let settings = RenderSettings::default();
        assert!(settings.density && settings.silhouettes && settings.pyramid);
        assert!(!settings.polygonal && !settings.x_mirroring);
        assert!(settings.polygonal_lighting);
        assert!(settings.share_transformations);
        assert_relative_eq!(settings.intensity, 0.5);
    }

    #[test]
    fn scalar_clamps() {
        assert_eq!(RenderSettings::clamp_intensity(1.5), 1.0);
        assert_eq!(RenderSettings::clamp_intensity(-0.2), 0.0);
        assert_eq!(RenderSettings::clamp_line_width(0.005), 1.0);
        assert_eq!(RenderSettings::clamp_line_width(5.0), 5.0);

        let settings = RenderSettings {
            line_width: 5.0,
            ..Default::default()
        };
        assert_eq!(settings.line_radius(), 2);
        assert_relative_eq!(settings.intensity_scale(), 0.5 / 5000.0);
    }
}
