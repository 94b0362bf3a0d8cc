use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::RenderResult;
use crate::renderer::gpu::GpuContext;

pub const LAYER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const SILHOUETTE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
pub const DIFF_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const FRAME_WGSL: &str = include_str!("shaders/frame.wgsl");
const MODEL_WGSL: &str = include_str!("shaders/model.wgsl");
const DIFF_WGSL: &str = include_str!("shaders/diff.wgsl");
const DENSITY_WGSL: &str = include_str!("shaders/density.wgsl");
const PYRAMID_WGSL: &str = include_str!("shaders/pyramid.wgsl");
const POLYGONAL_WGSL: &str = include_str!("shaders/polygonal.wgsl");
const SILHOUETTES_WGSL: &str = include_str!("shaders/silhouettes.wgsl");
const COMPOSITE_WGSL: &str = include_str!("shaders/composite.wgsl");
const BLIT_WGSL: &str = include_str!("shaders/blit.wgsl");

const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
const COLOR_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x3];
const NORMAL_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![2 => Float32x3];

fn float3_layout(attributes: &'static [wgpu::VertexAttribute]) -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: 12,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes,
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn depth_state(write: bool, compare: wgpu::CompareFunction) -> Option<wgpu::DepthStencilState> {
    Some(wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: write,
        depth_compare: compare,
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    })
}

/// Additive color, max alpha.
const DENSITY_BLEND: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Max,
    },
};

struct PassDescriptor<'a> {
    label: &'a str,
    layout: &'a wgpu::PipelineLayout,
    module: &'a wgpu::ShaderModule,
    buffers: &'a [wgpu::VertexBufferLayout<'a>],
    topology: wgpu::PrimitiveTopology,
    format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
    depth_stencil: Option<wgpu::DepthStencilState>,
}

fn create_pipeline(gpu: &GpuContext, pass: PassDescriptor) -> RenderResult<wgpu::RenderPipeline> {
    gpu.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(pass.label),
        layout: Some(pass.layout),
        vertex: wgpu::VertexState {
            module: pass.module,
            entry_point: Some("vs_main"),
            buffers: pass.buffers,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: pass.module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: pass.format,
                blend: pass.blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: pass.topology,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: pass.depth_stencil,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Static pipelines and bind group layouts shared by every surface of a
/// tree. Only the density pipeline depends on model data and lives
/// elsewhere, see [`Pipelines::build_density`].
pub struct Pipelines {
    pub frame_layout: wgpu::BindGroupLayout,
    pub model_layout: wgpu::BindGroupLayout,
    pub layers_layout: wgpu::BindGroupLayout,
    pub diff_layout: wgpu::BindGroupLayout,
    pub blit_layout: wgpu::BindGroupLayout,

    model_pipeline_layout: wgpu::PipelineLayout,
    blit_pipeline_layout: wgpu::PipelineLayout,
    blit_module: wgpu::ShaderModule,

    pub diff: wgpu::RenderPipeline,
    pub pyramid: wgpu::RenderPipeline,
    pub polygonal: wgpu::RenderPipeline,
    pub silhouettes: wgpu::RenderPipeline,
    pub composite: wgpu::RenderPipeline,

    blit: Mutex<HashMap<wgpu::TextureFormat, Arc<wgpu::RenderPipeline>>>,
}

impl Pipelines {
    pub fn new(gpu: &GpuContext) -> RenderResult<Self> {
        let device = &gpu.device;
        let both = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let fragment = wgpu::ShaderStages::FRAGMENT;

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Frame Bind Group Layout"),
            entries: &[uniform_entry(0, both)],
        });

        let model_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Model Bind Group Layout"),
            entries: &[
                uniform_entry(0, both),
                storage_entry(1, both),
                storage_entry(2, both),
                storage_entry(3, both),
                storage_entry(4, both),
                texture_entry(5, both),
                texture_entry(6, both),
            ],
        });

        let layers_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Layers Bind Group Layout"),
            entries: &[
                texture_entry(0, fragment),
                texture_entry(1, fragment),
                texture_entry(2, fragment),
                texture_entry(3, fragment),
            ],
        });

        let diff_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Diff Bind Group Layout"),
            entries: &[
                uniform_entry(0, fragment),
                storage_entry(1, fragment),
                storage_entry(2, fragment),
            ],
        });

        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blit Bind Group Layout"),
            entries: &[texture_entry(0, fragment)],
        });

        let model_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Model Pipeline Layout"),
            bind_group_layouts: &[&frame_layout, &model_layout],
            push_constant_ranges: &[],
        });
        let frame_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Frame Pipeline Layout"),
            bind_group_layouts: &[&frame_layout],
            push_constant_ranges: &[],
        });
        let composite_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Composite Pipeline Layout"),
            bind_group_layouts: &[&frame_layout, &layers_layout],
            push_constant_ranges: &[],
        });
        let diff_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Diff Pipeline Layout"),
            bind_group_layouts: &[&diff_layout],
            push_constant_ranges: &[],
        });
        let blit_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blit Pipeline Layout"),
            bind_group_layouts: &[&blit_layout],
            push_constant_ranges: &[],
        });

        let diff_module = gpu.create_shader_module("Diff Shader", DIFF_WGSL)?;
        let pyramid_module = gpu.create_shader_module("Pyramid Shader", &[FRAME_WGSL, PYRAMID_WGSL].concat())?;
        let polygonal_module =
            gpu.create_shader_module("Polygonal Shader", &[FRAME_WGSL, MODEL_WGSL, POLYGONAL_WGSL].concat())?;
        let silhouettes_module =
            gpu.create_shader_module("Silhouettes Shader", &[FRAME_WGSL, MODEL_WGSL, SILHOUETTES_WGSL].concat())?;
        let composite_module =
            gpu.create_shader_module("Composite Shader", &[FRAME_WGSL, COMPOSITE_WGSL].concat())?;
        let blit_module = gpu.create_shader_module("Blit Shader", BLIT_WGSL)?;

        let diff = create_pipeline(
            gpu,
            PassDescriptor {
                label: "Diff Pipeline",
                layout: &diff_pipeline_layout,
                module: &diff_module,
                buffers: &[],
                topology: wgpu::PrimitiveTopology::TriangleList,
                format: DIFF_FORMAT,
                blend: None,
                depth_stencil: None,
            },
        )?;

        let pyramid = create_pipeline(
            gpu,
            PassDescriptor {
                label: "Pyramid Pipeline",
                layout: &frame_pipeline_layout,
                module: &pyramid_module,
                buffers: &[],
                topology: wgpu::PrimitiveTopology::TriangleList,
                format: LAYER_FORMAT,
                blend: None,
                depth_stencil: depth_state(true, wgpu::CompareFunction::Less),
            },
        )?;

        let polygonal = create_pipeline(
            gpu,
            PassDescriptor {
                label: "Polygonal Pipeline",
                layout: &model_pipeline_layout,
                module: &polygonal_module,
                buffers: &[
                    float3_layout(&POSITION_ATTRIBUTES),
                    float3_layout(&COLOR_ATTRIBUTES),
                    float3_layout(&NORMAL_ATTRIBUTES),
                ],
                topology: wgpu::PrimitiveTopology::TriangleList,
                format: LAYER_FORMAT,
                blend: None,
                depth_stencil: depth_state(true, wgpu::CompareFunction::Less),
            },
        )?;

        let silhouettes = create_pipeline(
            gpu,
            PassDescriptor {
                label: "Silhouettes Pipeline",
                layout: &model_pipeline_layout,
                module: &silhouettes_module,
                buffers: &[],
                topology: wgpu::PrimitiveTopology::LineList,
                format: SILHOUETTE_FORMAT,
                blend: None,
                depth_stencil: depth_state(false, wgpu::CompareFunction::LessEqual),
            },
        )?;

        let composite = create_pipeline(
            gpu,
            PassDescriptor {
                label: "Composite Pipeline",
                layout: &composite_pipeline_layout,
                module: &composite_module,
                buffers: &[],
                topology: wgpu::PrimitiveTopology::TriangleList,
                format: OUTPUT_FORMAT,
                blend: None,
                depth_stencil: None,
            },
        )?;

        log::debug!("Static pipelines created");

        Ok(Self {
            frame_layout,
            model_layout,
            layers_layout,
            diff_layout,
            blit_layout,
            model_pipeline_layout,
            blit_pipeline_layout,
            blit_module,
            diff,
            pyramid,
            polygonal,
            silhouettes,
            composite,
            blit: Mutex::new(HashMap::new()),
        })
    }

    /// Density pipeline for `count` coefficients per tetrahedron.
    /// `fragment` is the generated `fs_main` for that count.
    pub fn build_density(&self, gpu: &GpuContext, count: u32, fragment: &str) -> RenderResult<wgpu::RenderPipeline> {
        let source = [FRAME_WGSL, MODEL_WGSL, DENSITY_WGSL, fragment].concat();
        let label = format!("Density Shader ({count} coefficients)");
        let module = gpu.create_shader_module(&label, &source)?;

        create_pipeline(
            gpu,
            PassDescriptor {
                label: "Density Pipeline",
                layout: &self.model_pipeline_layout,
                module: &module,
                buffers: &[],
                topology: wgpu::PrimitiveTopology::TriangleList,
                format: LAYER_FORMAT,
                blend: Some(DENSITY_BLEND),
                depth_stencil: depth_state(false, wgpu::CompareFunction::Less),
            },
        )
    }

    /// Blit pipeline targeting `format`, created on first use.
    pub fn blit(&self, gpu: &GpuContext, format: wgpu::TextureFormat) -> RenderResult<Arc<wgpu::RenderPipeline>> {
        let mut cache = self.blit.lock();
        if let Some(pipeline) = cache.get(&format) {
            return Ok(pipeline.clone());
        }

        let pipeline = Arc::new(create_pipeline(
            gpu,
            PassDescriptor {
                label: "Blit Pipeline",
                layout: &self.blit_pipeline_layout,
                module: &self.blit_module,
                buffers: &[],
                topology: wgpu::PrimitiveTopology::TriangleList,
                format,
                blend: None,
                depth_stencil: None,
            },
        )?);
        cache.insert(format, pipeline.clone());
        Ok(pipeline)
    }
}
