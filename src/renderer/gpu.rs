use std::sync::Arc;

use crate::config::ContextConfig;
use crate::encoding::PackedLayout;
use crate::error::{RenderError, RenderResult};

/// Device-level state owned by the root of a render surface tree.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub limits: wgpu::Limits,
    pub packing: PackedLayout,
    log_shader_diagnostics: bool,
}

impl GpuContext {
    /// Creates the instance, adapter and device. When `window` is given, a
    /// surface is created first so the adapter is picked compatible with it.
    pub async fn new(
        config: &ContextConfig,
        window: Option<Arc<winit::window::Window>>,
    ) -> RenderResult<(Self, Option<wgpu::Surface<'static>>)> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends,
            ..Default::default()
        });

        let surface = match window {
            Some(window) => Some(instance.create_surface(window)?),
            None => None,
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: surface.as_ref(),
                force_fallback_adapter: config.force_fallback_adapter,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        let info = adapter.get_info();
        log::info!("Using adapter {} ({:?})", info.name, info.backend);

        let adapter_limits = adapter.limits();
        let mut required_limits = config
            .required_limits
            .clone()
            .using_resolution(adapter_limits.clone());
        required_limits.max_storage_buffer_binding_size = adapter_limits.max_storage_buffer_binding_size;
        required_limits.max_buffer_size = adapter_limits.max_buffer_size;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("SSIM Device"),
                    required_features: config.required_features,
                    required_limits,
                    memory_hints: config.memory_hints.clone(),
                },
                None,
            )
            .await?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("Uncaptured wgpu error: {error}");
        }));

        let limits = device.limits();
        let packing = PackedLayout::for_max_dimension(limits.max_texture_dimension_2d);
        log::debug!(
            "Max texture dimension {}, packing width {}",
            limits.max_texture_dimension_2d,
            packing.width()
        );

        Ok((
            Self {
                instance,
                adapter,
                device,
                queue,
                limits,
                packing,
                log_shader_diagnostics: config.log_shader_diagnostics,
            },
            surface,
        ))
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.limits.max_texture_dimension_2d
    }

    /// Compiles WGSL inside a validation error scope so a bad module is
    /// reported as [`RenderError::ShaderCompilation`] instead of poisoning
    /// the device.
    pub fn create_shader_module(&self, label: &str, source: &str) -> RenderResult<wgpu::ShaderModule> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        self.check_scope(label)?;
        Ok(module)
    }

    /// Creates a pipeline inside a validation error scope.
    pub fn create_render_pipeline(
        &self,
        descriptor: &wgpu::RenderPipelineDescriptor,
    ) -> RenderResult<wgpu::RenderPipeline> {
        let label = descriptor.label.unwrap_or("pipeline").to_string();
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.device.create_render_pipeline(descriptor);
        self.check_scope(&label)?;
        Ok(pipeline)
    }

    fn check_scope(&self, label: &str) -> RenderResult<()> {
        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(()),
            Some(error) => {
                let message = error.to_string();
                if self.log_shader_diagnostics {
                    log::error!("{label}:\n{message}");
                }
                Err(RenderError::ShaderCompilation {
                    label: label.to_string(),
                    message,
                })
            }
        }
    }
}
