//! The render surface: one view onto the shared model with its own camera,
//! crop window and layer settings.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use glam::{Mat4, Vec3};
use parking_lot::{Mutex, RwLockWriteGuard};
use winit::window::Window;

use crate::config::{ContextConfig, RenderSettings};
use crate::error::{RenderError, RenderResult};
use crate::export;
use crate::model::{Mesh, Pyramid, StatisticalData};
use crate::renderer::camera::{FrameUniforms, Pose, Rect, ViewCamera, frustum_rect, vertices_mask};
use crate::renderer::context::{ContextNode, NodeState, PoseSlot, ResourceRole, SharedPose, SharedResources};
use crate::renderer::model_buffers::{DiffState, ModelBuffers};
use crate::renderer::passes;
use crate::renderer::readback::read_texture_f32;
use crate::renderer::targets::{CropWindow, RenderTargets};

/// Where a surface presents its output.
#[derive(Clone, Default)]
pub enum RenderTarget {
    #[default]
    Offscreen,
    /// The output is blitted onto the window after every render.
    Window(Arc<Window>),
}

/// Handles passed to the overlay callback of
/// [`RenderSurface::render_with_overlay`], after the blit was encoded.
pub struct OverlayFrame<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub encoder: &'a mut wgpu::CommandEncoder,
    pub view: &'a wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
}

struct WindowOutput {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

impl WindowOutput {
    fn new(resources: &SharedResources, surface: wgpu::Surface<'static>, window: &Window) -> Self {
        let size = window.inner_size();
        let caps = surface.get_capabilities(&resources.gpu.adapter);
        // the blit copies linear values unmodified
        let format = caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or(caps.formats.first())
            .copied()
            .unwrap_or(wgpu::TextureFormat::Bgra8Unorm);
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(resources.device(), &config);
        log::info!("Window surface {}x{} {:?}", config.width, config.height, format);

        Self { surface, config }
    }

    fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(device, &self.config);
        }
    }

    /// Next swapchain texture, or `None` when this frame cannot be
    /// presented.
    fn acquire(&mut self, device: &wgpu::Device) -> RenderResult<Option<wgpu::SurfaceTexture>> {
        match self.surface.get_current_texture() {
            Ok(texture) => Ok(Some(texture)),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(device, &self.config);
                Ok(None)
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Surface timeout, frame not presented");
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }
}

/// Per-surface GPU objects, created on first use.
struct SurfaceGpu {
    resources: Arc<SharedResources>,
    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    targets: Option<RenderTargets>,
    window: Option<WindowOutput>,
}

impl SurfaceGpu {
    fn new(resources: Arc<SharedResources>, surface: Option<wgpu::Surface<'static>>, window: Option<&Window>) -> Self {
        let device = resources.device();
        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Uniform Buffer"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Frame Bind Group"),
            layout: &resources.pipelines.frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
        });

        let window = match (surface, window) {
            (Some(surface), Some(window)) => Some(WindowOutput::new(&resources, surface, window)),
            _ => None,
        };

        Self {
            resources,
            frame_buffer,
            frame_bind_group,
            targets: None,
            window,
        }
    }
}

/// Brings the targets to the current size and crop, recreating them when
/// `resize` is set or the size differs.
fn sync_targets<'a>(
    slot: &'a mut Option<RenderTargets>,
    resources: &SharedResources,
    settings: &RenderSettings,
    crop: CropWindow,
    resize: bool,
) -> &'a RenderTargets {
    let (width, height) = (settings.render_width, settings.render_height);
    let targets = match slot.take() {
        Some(mut targets) if !resize && (targets.width, targets.height) == (width, height) => {
            if targets.crop != crop {
                targets.set_crop(resources.device(), &resources.pipelines, crop);
            }
            targets
        }
        _ => {
            log::debug!("Resizing render targets to {width}x{height}");
            RenderTargets::new(resources.device(), &resources.pipelines, width, height, crop)
        }
    };
    slot.insert(targets)
}

/// Encodes the diff pass of every stale channel.
fn encode_stale_diffs(encoder: &mut wgpu::CommandEncoder, resources: &SharedResources, model: &mut ModelBuffers) {
    for channel in [&mut model.shape, &mut model.density] {
        if channel.state() == DiffState::Stale {
            passes::encode_diff(encoder, &resources.pipelines, channel);
            channel.mark_clean();
            log::debug!("{} diff recomputed", channel.label());
        }
    }
}

fn to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub struct RenderSurface {
    node: Arc<ContextNode>,
    window: Option<Arc<Window>>,
    gpu: Option<SurfaceGpu>,

    settings: RenderSettings,
    camera: ViewCamera,
    pose: SharedPose,
    crop: CropWindow,
    size_changed: bool,

    last_render_ms: f64,
}

impl RenderSurface {
    /// Root surface owning a new GPU context. Nothing touches the GPU until
    /// the first call that needs it.
    pub fn new(target: RenderTarget, config: ContextConfig) -> Self {
        Self::with_node(ContextNode::root(config), target)
    }

    /// Child surface borrowing the context and model of `parent`'s tree.
    pub fn with_parent(parent: &RenderSurface, target: RenderTarget) -> Self {
        let surface = Self::with_node(ContextNode::child(&parent.node), target);
        if parent.settings.share_transformations {
            surface.pose.lock().pose = parent.pose();
        }
        surface
    }

    fn with_node(node: Arc<ContextNode>, target: RenderTarget) -> Self {
        let settings = RenderSettings::default();
        let pose = Arc::new(Mutex::new(PoseSlot {
            pose: Pose::default(),
            shared: settings.share_transformations,
        }));
        node.register_pose(&pose);

        let window = match target {
            RenderTarget::Offscreen => None,
            RenderTarget::Window(window) => Some(window),
        };

        Self {
            node,
            window,
            gpu: None,
            crop: CropWindow::full(settings.render_width, settings.render_height),
            settings,
            camera: ViewCamera::default(),
            pose,
            size_changed: true,
            last_render_ms: 0.0,
        }
    }

    fn ensure_ready(&mut self) -> RenderResult<&mut SurfaceGpu> {
        let gpu = match self.gpu.take() {
            Some(gpu) => gpu,
            None => {
                let (resources, surface) = self.node.ensure_initialized(self.window.clone())?;
                SurfaceGpu::new(resources, surface, self.window.as_deref())
            }
        };
        Ok(self.gpu.insert(gpu))
    }

    /// Forces context creation.
    pub fn initialize(&mut self) -> RenderResult<()> {
        self.ensure_ready().map(|_| ())
    }

    pub fn state(&self) -> NodeState {
        self.node.state()
    }

    pub fn role(&self) -> ResourceRole {
        self.node.role()
    }

    /// Shared GPU resources of the tree, initializing them if needed.
    pub fn resources(&mut self) -> RenderResult<Arc<SharedResources>> {
        Ok(self.ensure_ready()?.resources.clone())
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    // ---- model ----
    //
    // Model mutators fail with [`RenderError::NotResourceOwner`] on a child
    // surface: the tree's model is owned by the root and children only read it.

    /// Uploads `mesh` with white colors and its own normals. Child surfaces
    /// get [`RenderError::NotResourceOwner`].
    pub fn set_mesh(&mut self, mesh: &Mesh) -> RenderResult<()> {
        self.set_mesh_with(mesh, None, None)
    }

    /// Uploads `mesh` with optional per-vertex colors and normals, flat
    /// `xyz` triples. Root surfaces only.
    pub fn set_mesh_with(&mut self, mesh: &Mesh, colors: Option<&[f32]>, normals: Option<&[f32]>) -> RenderResult<()> {
        self.node.require_owner("set_mesh")?;
        let resources = self.resources()?;
        let mut model = resources.model.write();
        model.set_mesh(resources.device(), &resources.pipelines, mesh, colors, normals)
    }

    /// Binds a shape model: its mean replaces the mesh vertices. Root
    /// surfaces only.
    pub fn set_vertices(&mut self, data: &StatisticalData) -> RenderResult<()> {
        self.node.require_owner("set_vertices")?;
        let resources = self.resources()?;
        let mut model = resources.model.write();
        model
            .set_vertices(resources.device(), resources.queue(), &resources.pipelines, data)
            .inspect_err(|e| log::error!("set_vertices: {e}"))
    }

    /// Refreshes the coefficients of the bound shape model, or binds `data`
    /// if it is a different model. Root surfaces only.
    pub fn update_vertices(&mut self, data: &StatisticalData) -> RenderResult<()> {
        self.node.require_owner("update_vertices")?;
        let resources = self.resources()?;
        let mut model = resources.model.write();
        model
            .update_vertices(resources.device(), resources.queue(), &resources.pipelines, data)
            .inspect_err(|e| log::error!("update_vertices: {e}"))
    }

    /// Binds a density model. Its mean holds the raw per-tetrahedron
    /// Bernstein coefficients. Root surfaces only.
    pub fn set_coefficients(&mut self, data: &StatisticalData) -> RenderResult<()> {
        self.node.require_owner("set_coefficients")?;
        let resources = self.resources()?;
        let mut model = resources.model.write();
        let count = model
            .set_coefficients(resources.device(), resources.queue(), &resources.pipelines, data)
            .inspect_err(|e| log::error!("set_coefficients: {e}"))?;
        log::debug!("Density model bound with {count} coefficients per tetrahedron");
        Ok(())
    }

    /// Density counterpart of [`Self::update_vertices`]. Root surfaces only.
    pub fn update_coefficients(&mut self, data: &StatisticalData) -> RenderResult<()> {
        self.node.require_owner("update_coefficients")?;
        let resources = self.resources()?;
        let mut model = resources.model.write();
        model
            .update_coefficients(resources.device(), resources.queue(), &resources.pipelines, data)
            .inspect_err(|e| log::error!("update_coefficients: {e}"))
            .map(|_| ())
    }

    // ---- pose ----

    fn update_pose(&self, update: impl FnOnce(&mut Pose)) {
        let (pose, shared) = {
            let mut slot = self.pose.lock();
            update(&mut slot.pose);
            (slot.pose, slot.shared)
        };
        if shared {
            self.node.broadcast_pose(&self.pose, pose);
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose.lock().pose
    }

    pub fn set_translation(&mut self, position: Vec3) {
        self.update_pose(|pose| pose.set_translation(position));
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.update_pose(|pose| pose.translate(offset));
    }

    pub fn translation(&self) -> Vec3 {
        self.pose().translation()
    }

    pub fn translation_matrix(&self) -> Mat4 {
        self.pose().translation_matrix()
    }

    pub fn set_rotation(&mut self, angles: Vec3) {
        self.update_pose(|pose| pose.set_rotation(angles));
    }

    pub fn rotate(&mut self, delta: Vec3) {
        self.update_pose(|pose| pose.rotate(delta));
    }

    pub fn set_rotation_matrix(&mut self, rotation: Mat4) {
        self.update_pose(|pose| pose.set_rotation_matrix(rotation));
    }

    pub fn rotation(&self) -> Vec3 {
        self.pose().rotation()
    }

    pub fn rotation_matrix(&self) -> Mat4 {
        self.pose().rotation_matrix()
    }

    pub fn set_share_transformations(&mut self, share: bool) {
        self.settings.share_transformations = share;
        self.pose.lock().shared = share;
    }

    pub fn is_sharing_transformations(&self) -> bool {
        self.settings.share_transformations
    }

    // ---- camera ----

    pub fn set_perspective(&mut self, pyramid: Pyramid) -> RenderResult<()> {
        self.camera.set_perspective(pyramid)
    }

    pub fn perspective(&self) -> &Pyramid {
        self.camera.perspective()
    }

    pub fn set_camera(&mut self, eye: Vec3, center: Vec3) -> RenderResult<()> {
        self.camera.set_camera(eye, center)
    }

    pub fn set_camera_pyramid(&mut self, pyramid: &Pyramid) -> RenderResult<()> {
        self.camera.set_camera_pyramid(pyramid)
    }

    pub fn move_camera(&mut self, distance: f32, center: Vec3) -> RenderResult<()> {
        self.camera.move_camera(distance, center)
    }

    pub fn rotate_camera(&mut self, x_deg: f32, y_deg: f32, center: Vec3) -> RenderResult<()> {
        self.camera.rotate_camera(x_deg, y_deg, center)
    }

    pub fn set_eye(&mut self, eye: Vec3) -> RenderResult<()> {
        self.camera.set_eye(eye)
    }

    pub fn set_center(&mut self, center: Vec3) -> RenderResult<()> {
        self.camera.set_center(center)
    }

    pub fn eye(&self) -> Vec3 {
        self.camera.eye()
    }

    pub fn center(&self) -> Vec3 {
        self.camera.center()
    }

    pub fn middle(&self) -> Vec3 {
        self.camera.middle()
    }

    pub fn view_dir(&self) -> Vec3 {
        self.camera.view_dir()
    }

    pub fn camera_matrix(&self) -> Mat4 {
        self.camera.matrix()
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.camera.projection(self.aspect())
    }

    fn aspect(&self) -> f32 {
        self.settings.render_width as f32 / self.settings.render_height as f32
    }

    // ---- layers and scalars ----

    pub fn enable_density(&mut self, enabled: bool) {
        self.settings.density = enabled;
    }

    pub fn enable_silhouettes(&mut self, enabled: bool) {
        self.settings.silhouettes = enabled;
    }

    pub fn enable_polygonal(&mut self, enabled: bool) {
        self.settings.polygonal = enabled;
    }

    pub fn enable_pyramid(&mut self, enabled: bool) {
        self.settings.pyramid = enabled;
    }

    pub fn enable_x_mirroring(&mut self, enabled: bool) {
        self.settings.x_mirroring = enabled;
    }

    pub fn enable_polygonal_lighting(&mut self, enabled: bool) {
        self.settings.polygonal_lighting = enabled;
    }

    pub fn is_density_enabled(&self) -> bool {
        self.settings.density
    }

    pub fn is_silhouettes_enabled(&self) -> bool {
        self.settings.silhouettes
    }

    pub fn is_polygonal_enabled(&self) -> bool {
        self.settings.polygonal
    }

    pub fn is_pyramid_enabled(&self) -> bool {
        self.settings.pyramid
    }

    pub fn is_x_mirroring_enabled(&self) -> bool {
        self.settings.x_mirroring
    }

    pub fn is_polygonal_lighting_enabled(&self) -> bool {
        self.settings.polygonal_lighting
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.settings.intensity = RenderSettings::clamp_intensity(intensity);
    }

    pub fn intensity(&self) -> f32 {
        self.settings.intensity
    }

    pub fn set_line_width(&mut self, width: f32) {
        self.settings.line_width = RenderSettings::clamp_line_width(width);
    }

    pub fn line_width(&self) -> f32 {
        self.settings.line_width
    }

    pub fn set_param(&mut self, param: f32) {
        self.settings.param = param;
    }

    pub fn param(&self) -> f32 {
        self.settings.param
    }

    // ---- size and crop ----

    /// Accepts sizes in `1..=max` where `max` is the device texture limit.
    /// Resets the crop window to the full target.
    pub fn set_render_size(&mut self, width: u32, height: u32) -> RenderResult<()> {
        let max = self.resources()?.gpu.max_texture_dimension();
        if !(1..=max).contains(&width) || !(1..=max).contains(&height) {
            log::error!("Render size {width}x{height} outside 1..={max}");
            return Err(RenderError::InvalidRenderSize { width, height, max });
        }

        self.settings.render_width = width;
        self.settings.render_height = height;
        self.crop = CropWindow::full(width, height);
        self.size_changed = true;
        Ok(())
    }

    pub fn set_render_width(&mut self, width: u32) -> RenderResult<()> {
        self.set_render_size(width, self.settings.render_height)
    }

    pub fn set_render_height(&mut self, height: u32) -> RenderResult<()> {
        self.set_render_size(self.settings.render_width, height)
    }

    pub fn render_width(&self) -> u32 {
        self.settings.render_width
    }

    pub fn render_height(&self) -> u32 {
        self.settings.render_height
    }

    /// Top-left origin. A window not fully inside the render target is
    /// ignored and reported.
    pub fn set_crop_window(&mut self, x: u32, y: u32, width: u32, height: u32) -> RenderResult<()> {
        match CropWindow::validated(x, y, width, height, self.settings.render_width, self.settings.render_height) {
            Ok(crop) => {
                self.crop = crop;
                Ok(())
            }
            Err(error) => {
                log::warn!("Crop window ignored: {error}");
                Err(error)
            }
        }
    }

    pub fn crop_x(&self) -> u32 {
        self.crop.x
    }

    pub fn crop_y(&self) -> u32 {
        self.crop.y
    }

    pub fn crop_width(&self) -> u32 {
        self.crop.width
    }

    pub fn crop_height(&self) -> u32 {
        self.crop.height
    }

    pub fn crop_rectangle(&self) -> CropWindow {
        self.crop
    }

    // ---- window ----

    pub fn resize_window(&mut self, width: u32, height: u32) {
        if let Some(gpu) = &mut self.gpu {
            let device = gpu.resources.device();
            if let Some(window) = &mut gpu.window {
                window.resize(device, width, height);
            }
        }
    }

    pub fn surface_format(&self) -> Option<wgpu::TextureFormat> {
        self.gpu.as_ref()?.window.as_ref().map(|w| w.config.format)
    }

    // ---- rendering ----

    /// Renders one frame and blocks until the GPU finished. Returns the
    /// elapsed time in milliseconds.
    pub fn render(&mut self) -> RenderResult<f64> {
        self.render_with_overlay(|_| {})
    }

    /// Like [`RenderSurface::render`]; for a window, `overlay` may record
    /// extra passes onto the presented frame after the blit.
    pub fn render_with_overlay<F>(&mut self, overlay: F) -> RenderResult<f64>
    where
        F: FnOnce(&mut OverlayFrame<'_>),
    {
        let settings = self.settings;
        let camera = self.camera;
        let pose = self.pose();
        let crop = self.crop;
        let frame = FrameUniforms::new(self.projection_matrix(), &camera, &pose, &settings, crop.uniform());
        let resize = std::mem::take(&mut self.size_changed);

        let gpu = self.ensure_ready()?;
        let resources = gpu.resources.clone();
        let device = resources.device();
        let queue = resources.queue();

        device.poll(wgpu::Maintain::Wait);
        let start = Instant::now();

        let targets = sync_targets(&mut gpu.targets, &resources, &settings, crop, resize);
        queue.write_buffer(&gpu.frame_buffer, 0, bytemuck::cast_slice(&[frame]));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });

        let mut model = resources.model.write();
        encode_stale_diffs(&mut encoder, &resources, &mut model);
        let model = RwLockWriteGuard::downgrade(model);

        passes::encode_clear(&mut encoder, targets);

        if settings.pyramid {
            passes::encode_pyramid(&mut encoder, &resources.pipelines, targets, &gpu.frame_bind_group);
        }

        if settings.density {
            match &model.mesh {
                None => log::debug!("Density skipped: no mesh"),
                Some(mesh) if mesh.tetrahedron_count == 0 => {
                    log::warn!("Density skipped: tetrahedral mesh is not available")
                }
                Some(_) if model.coefficients_per_tetrahedron == 0 => {
                    log::debug!("Density skipped: no density model")
                }
                Some(mesh) => {
                    let pipeline = resources.density_pipeline(model.coefficients_per_tetrahedron)?;
                    passes::encode_density(
                        &mut encoder,
                        &pipeline,
                        targets,
                        &gpu.frame_bind_group,
                        &model,
                        mesh.tetrahedron_count,
                    );
                }
            }
        }

        if settings.polygonal {
            match &model.mesh {
                Some(mesh) if mesh.triangle_index_count > 0 => {
                    passes::encode_polygonal(&mut encoder, &resources.pipelines, targets, &gpu.frame_bind_group, &model);
                }
                _ => log::debug!("Polygonal skipped: no triangles"),
            }
        }

        if settings.silhouettes {
            match &model.mesh {
                None => log::debug!("Silhouettes skipped: no mesh"),
                Some(mesh) if mesh.adjacency_count == 0 => {
                    log::warn!("Silhouettes skipped: triangle adjacency is not available")
                }
                Some(mesh) => passes::encode_silhouettes(
                    &mut encoder,
                    &resources.pipelines,
                    targets,
                    &gpu.frame_bind_group,
                    &model,
                    mesh.adjacency_count,
                ),
            }
        }
        drop(model);

        passes::encode_composite(&mut encoder, &resources.pipelines, targets, &gpu.frame_bind_group);

        let presented = match &mut gpu.window {
            Some(window) => match window.acquire(device)? {
                Some(texture) => {
                    let view = texture.texture.create_view(&wgpu::TextureViewDescriptor::default());
                    let blit = resources.pipelines.blit(&resources.gpu, window.config.format)?;
                    passes::encode_blit(&mut encoder, &blit, targets, &view);
                    overlay(&mut OverlayFrame {
                        device,
                        queue,
                        encoder: &mut encoder,
                        view: &view,
                        format: window.config.format,
                        width: window.config.width,
                        height: window.config.height,
                    });
                    Some(texture)
                }
                None => None,
            },
            None => None,
        };

        queue.submit(std::iter::once(encoder.finish()));
        if let Some(texture) = presented {
            texture.present();
        }

        device.poll(wgpu::Maintain::Wait);
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
        self.last_render_ms = elapsed;
        Ok(elapsed)
    }

    pub fn last_render_time_ms(&self) -> f64 {
        self.last_render_ms
    }

    /// Composited output of the last render, sized to the crop window.
    pub fn output_texture(&self) -> Option<&wgpu::Texture> {
        let targets = self.gpu.as_ref()?.targets.as_ref()?;
        Some(&targets.output.texture)
    }

    // ---- readback ----

    fn read_output(&mut self) -> RenderResult<(Vec<f32>, u32, u32)> {
        let settings = self.settings;
        let crop = self.crop;
        let gpu = self.ensure_ready()?;
        let resources = gpu.resources.clone();
        let targets = sync_targets(&mut gpu.targets, &resources, &settings, crop, false);
        let (width, height) = (targets.crop.width, targets.crop.height);
        let rgba = read_texture_f32(
            resources.device(),
            resources.queue(),
            &targets.output.texture,
            width,
            height,
            4,
        )?;
        Ok((rgba, width, height))
    }

    /// 8-bit RGB of the cropped output, top-left origin.
    pub fn get_rendered_image(&mut self) -> RenderResult<image::RgbImage> {
        let (rgba, width, height) = self.read_output()?;
        let pixels: Vec<u8> = rgba
            .chunks_exact(4)
            .flat_map(|p| [to_u8(p[0]), to_u8(p[1]), to_u8(p[2])])
            .collect();
        image::RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| RenderError::BufferMap(format!("readback does not fill {width}x{height}")))
    }

    /// Raw red channel of the cropped output, row-major from the top-left.
    pub fn get_rendered_red_channel(&mut self) -> RenderResult<Vec<f32>> {
        let (rgba, _, _) = self.read_output()?;
        Ok(rgba.chunks_exact(4).map(|p| p[0]).collect())
    }

    pub fn save_rendered_image(&mut self, path: &Path) -> RenderResult<()> {
        self.get_rendered_image()?
            .save_with_format(path, image::ImageFormat::Png)?;
        log::info!("Rendered image saved to {}", path.display());
        Ok(())
    }

    /// Full-size RGBA silhouette layer: model-space edge position in RGB,
    /// alpha 1 on edges.
    pub fn get_current_silhouettes_image(&mut self) -> RenderResult<Vec<f32>> {
        let settings = self.settings;
        let crop = self.crop;
        let gpu = self.ensure_ready()?;
        let resources = gpu.resources.clone();
        let targets = sync_targets(&mut gpu.targets, &resources, &settings, crop, false);
        read_texture_f32(
            resources.device(),
            resources.queue(),
            &targets.silhouettes.texture,
            targets.width,
            targets.height,
            4,
        )
    }

    /// Current shape diff, recomputing it first if stale.
    fn read_shape_diff(resources: &SharedResources) -> RenderResult<Vec<f32>> {
        let device = resources.device();
        let queue = resources.queue();

        let mut model = resources.model.write();
        if model.shape.state() == DiffState::Stale {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Diff Encoder"),
            });
            encode_stale_diffs(&mut encoder, resources, &mut model);
            queue.submit(std::iter::once(encoder.finish()));
        }

        let rows = model.shape.rows() as usize;
        if rows == 0 {
            return Ok(vec![0.0; model.mean_vertices().len()]);
        }

        let packing = resources.packing();
        let texture = &model.shape.texture;
        let packed = read_texture_f32(device, queue, texture, texture.width(), texture.height(), 1)?;
        Ok(packing.unpack(&packed, texture.width() as usize, rows))
    }

    /// Reconstructed vertices as flat `xyz`, mirrored when x mirroring is
    /// on and posed by `T * R` when `transformed`.
    pub fn get_recomputed_vertices_flat(&mut self, transformed: bool) -> RenderResult<Vec<f32>> {
        Ok(self
            .get_recomputed_vertices(transformed)?
            .iter()
            .flat_map(|v| v.to_array())
            .collect())
    }

    pub fn get_recomputed_vertices(&mut self, transformed: bool) -> RenderResult<Vec<Vec3>> {
        let mirror = self.settings.x_mirroring;
        let model_matrix = self.pose().model_matrix();
        let resources = self.resources()?;

        let diff = Self::read_shape_diff(&resources)?;
        let model = resources.model.read();
        if model.mesh.is_none() {
            return Err(RenderError::MissingMesh);
        }

        Ok(model
            .mean_vertices()
            .chunks_exact(3)
            .zip(diff.chunks_exact(3))
            .map(|(mean, diff)| {
                let mut v = Vec3::new(mean[0] + diff[0], mean[1] + diff[1], mean[2] + diff[2]);
                if mirror {
                    v.x = -v.x;
                }
                if transformed {
                    v = model_matrix.transform_point3(v);
                }
                v
            })
            .collect())
    }

    /// Per-vertex visibility under `P * C * T * R`. `vertices` default to the
    /// model-space reconstruction and `rect` to the frustum rectangle.
    pub fn get_vertices_mask(&mut self, vertices: Option<&[Vec3]>, rect: Option<Rect>) -> RenderResult<Vec<bool>> {
        let view_projection = self.projection_matrix() * self.camera.matrix();
        let rect = rect.unwrap_or_else(|| frustum_rect(view_projection, self.camera.perspective().corners()));
        let transform = view_projection * self.pose().model_matrix();

        let reconstructed;
        let vertices = match vertices {
            Some(vertices) => vertices,
            None => {
                reconstructed = self.get_recomputed_vertices(false)?;
                &reconstructed
            }
        };
        Ok(vertices_mask(vertices, transform, rect))
    }

    pub fn write_stl<W: Write>(&mut self, out: &mut W, transformed: bool, mask: Option<&[bool]>) -> RenderResult<()> {
        let vertices = self.get_recomputed_vertices(transformed)?;
        let resources = self.resources()?;
        let model = resources.model.read();
        export::write_stl(out, &vertices, model.triangles(), mask)
    }

    pub fn export_stl(&mut self, path: &Path, transformed: bool, mask: Option<&[bool]>) -> RenderResult<()> {
        let vertices = self.get_recomputed_vertices(transformed)?;
        let resources = self.resources()?;
        let model = resources.model.read();
        export::export_stl(path, &vertices, model.triangles(), mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyntheticModel;
    use crate::renderer::density_shader::{bernstein_tuples, coeffs_count_from_degree, multinomial};
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use glam::{UVec3, Vec4};

    const EDGE: f32 = 50.0;

    /// Offscreen surface, or `None` when this machine has no usable GPU.
    fn offscreen() -> Option<RenderSurface> {
        let mut surface = RenderSurface::new(RenderTarget::Offscreen, ContextConfig::from_env());
        match surface.initialize() {
            Ok(()) => Some(surface),
            Err(error @ (RenderError::NoAdapter | RenderError::RequestDevice(_))) => {
                eprintln!("skipping GPU test: {error}");
                None
            }
            Err(error) => panic!("context creation failed: {error}"),
        }
    }

    fn density_only(surface: &mut RenderSurface) {
        surface.enable_pyramid(false);
        surface.enable_silhouettes(false);
        surface.enable_polygonal(false);
        surface.enable_density(true);
    }

    fn max_red(surface: &mut RenderSurface, value: f32) -> (f32, Vec<f32>) {
        max_red_of_degree(surface, 0, value)
    }

    fn max_red_of_degree(surface: &mut RenderSurface, degree: u32, value: f32) -> (f32, Vec<f32>) {
        let model = SyntheticModel::tetrahedron(EDGE, degree, value).unwrap();
        surface.set_mesh(&model.mesh).unwrap();
        surface.set_vertices(&model.shape).unwrap();
        surface.set_coefficients(&model.density).unwrap();
        surface.render().unwrap();
        let red = surface.get_rendered_red_channel().unwrap();
        (red.iter().copied().fold(0.0, f32::max), red)
    }

    #[test]
    fn tetrahedron_integral_scales_with_density() {
        let Some(mut surface) = offscreen() else { return };
        density_only(&mut surface);

        let (single, red) = max_red(&mut surface, 1.0);
        let (double, _) = max_red(&mut surface, 2.0);

        // longest ray runs along the z edge
        let expected = surface.settings().intensity_scale() * EDGE;
        assert!(single > expected * 0.9 && single < expected * 1.05, "{single} vs {expected}");
        assert_relative_eq!(double / single, 2.0, max_relative = 1e-2);

        let (w, h) = (surface.crop_width() as usize, surface.crop_height() as usize);
        assert_eq!(red.len(), w * h);
        for (x, y) in [(0, 0), (0, h - 1), (w - 1, h - 1), (w / 4, 3 * h / 4)] {
            assert_eq!(red[y * w + x], 0.0, "texel {x},{y}");
        }
    }

    /// Texel under the projection of model-space `p`, identity pose.
    fn texel_of(surface: &RenderSurface, p: Vec3) -> (usize, usize) {
        let clip = surface.projection_matrix() * surface.camera_matrix() * p.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        let col = (ndc.x + 1.0) / 2.0 * surface.render_width() as f32;
        let row = (1.0 - ndc.y) / 2.0 * surface.render_height() as f32;
        (col as usize, row as usize)
    }

    /// Integral of the Bernstein polynomial with `coefficients` over the
    /// tetrahedron `(0, EDGE x, EDGE y, EDGE z)` along the eye ray through
    /// the centre of `texel`.
    fn ray_integral(surface: &RenderSurface, texel: (usize, usize), degree: u32, coefficients: &[f32]) -> f32 {
        let (col, row) = texel;
        let ndc = Vec3::new(
            (col as f32 + 0.5) / surface.render_width() as f32 * 2.0 - 1.0,
            1.0 - (row as f32 + 0.5) / surface.render_height() as f32 * 2.0,
            0.5,
        );
        let inverse = (surface.projection_matrix() * surface.camera_matrix()).inverse();
        let eye = surface.eye();
        let direction = inverse.project_point3(ndc) - eye;

        let barycentric = |p: Vec3| {
            let l = p / EDGE;
            Vec4::new(1.0 - l.x - l.y - l.z, l.x, l.y, l.z)
        };
        let start = barycentric(eye);
        let step = barycentric(eye + direction) - start;

        let (mut enter, mut exit) = (f32::MIN, f32::MAX);
        for i in 0..4 {
            if step[i] > 0.0 {
                enter = enter.max(-start[i] / step[i]);
            } else if step[i] < 0.0 {
                exit = exit.min(-start[i] / step[i]);
            }
        }
        assert!(enter < exit, "texel {col},{row} misses the tetrahedron");

        let tuples = bernstein_tuples(degree);
        let density = |t: f32| {
            let b = start + step * t;
            tuples
                .iter()
                .zip(coefficients)
                .map(|(k, c)| {
                    let monomial: f32 = (0..4).map(|i| b[i].powi(k[i] as i32)).product();
                    c * multinomial(*k) as f32 * monomial
                })
                .sum::<f32>()
        };

        // Simpson's rule
        const STEPS: usize = 256;
        let dt = (exit - enter) / STEPS as f32;
        let weighted: f32 = (0..=STEPS)
            .map(|i| {
                let weight = match i {
                    0 | STEPS => 1.0,
                    i if i % 2 == 1 => 4.0,
                    _ => 2.0,
                };
                weight * density(enter + dt * i as f32)
            })
            .sum();
        weighted * dt / 3.0 * direction.length()
    }

    #[test]
    fn uniform_coefficients_match_constant_density() {
        let Some(mut surface) = offscreen() else { return };
        density_only(&mut surface);

        let (constant, constant_red) = max_red_of_degree(&mut surface, 0, 1.5);
        let constant_sum: f32 = constant_red.iter().sum();
        for degree in [1, 2] {
            let (peak, red) = max_red_of_degree(&mut surface, degree, 1.5);
            assert_relative_eq!(peak, constant, max_relative = 1e-2);
            let sum: f32 = red.iter().sum();
            assert_relative_eq!(sum, constant_sum, max_relative = 1e-2);
        }
    }

    #[test]
    fn graded_coefficients_match_cpu_integral() {
        let Some(mut surface) = offscreen() else { return };
        density_only(&mut surface);

        let degree = 2;
        let coefficients: Vec<f32> = (0..coeffs_count_from_degree(degree))
            .map(|i| 1.0 + 0.5 * i as f32)
            .collect();
        // half in the mean, half through the diff texture
        let halves: Vec<f32> = coefficients.iter().map(|c| c / 2.0).collect();
        let mut density = StatisticalData::from_mean_and_basis(halves.clone(), halves, 1).unwrap();
        density.update_pcs(0, 1.0).unwrap();

        let model = SyntheticModel::tetrahedron(EDGE, degree, 1.0).unwrap();
        surface.set_mesh(&model.mesh).unwrap();
        surface.set_vertices(&model.shape).unwrap();
        surface.set_coefficients(&density).unwrap();
        surface.render().unwrap();
        let red = surface.get_rendered_red_channel().unwrap();
        let width = surface.render_width() as usize;

        let scale = surface.settings().intensity_scale();
        for p in [Vec3::splat(EDGE / 4.0), Vec3::new(EDGE / 8.0, EDGE / 2.0, EDGE / 8.0)] {
            let (col, row) = texel_of(&surface, p);
            let expected = scale * ray_integral(&surface, (col, row), degree, &coefficients);
            assert!(expected > 0.0);
            assert_relative_eq!(red[row * width + col], expected, max_relative = 2e-2);
        }
    }

    #[test]
    fn silhouettes_trace_the_outline_only() {
        let Some(mut surface) = offscreen() else { return };
        surface.enable_density(false);
        surface.enable_pyramid(false);
        surface.enable_polygonal(false);
        surface.enable_silhouettes(true);

        let model = SyntheticModel::boxed(UVec3::splat(2), Vec3::splat(80.0), 1, 1.0).unwrap();
        surface.set_mesh(&model.mesh).unwrap();
        surface.set_vertices(&model.shape).unwrap();
        surface.render().unwrap();

        let image = surface.get_current_silhouettes_image().unwrap();
        let width = surface.render_width() as usize;
        assert_eq!(image.len(), width * surface.render_height() as usize * 4);
        let alpha = |(col, row): (usize, usize)| image[(row * width + col) * 4 + 3];

        // inner edges of the top face join coplanar front faces
        assert_eq!(alpha(texel_of(&surface, Vec3::new(0.0, 0.0, 40.0))), 0.0);
        assert_eq!(alpha(texel_of(&surface, Vec3::new(20.0, 0.0, 40.0))), 0.0);
        // the bottom rim lies between two back faces
        assert_eq!(alpha(texel_of(&surface, Vec3::new(40.0, 0.0, -40.0))), 0.0);

        let (col, row) = texel_of(&surface, Vec3::new(40.0, 0.0, 40.0));
        let hit = (row - 2..=row + 2)
            .flat_map(|r| (col - 2..=col + 2).map(move |c| (c, r)))
            .find(|&texel| alpha(texel) > 0.0);
        let (c, r) = hit.expect("no silhouette along the top rim");
        assert_abs_diff_eq!(image[(r * width + c) * 4], 40.0, epsilon = 1.0);
        assert_abs_diff_eq!(image[(r * width + c) * 4 + 2], 40.0, epsilon = 1.0);
    }

    #[test]
    fn incomplete_meshes_skip_their_passes() {
        let Some(mut surface) = offscreen() else { return };
        surface.enable_pyramid(false);
        surface.enable_polygonal(false);
        surface.enable_density(true);
        surface.enable_silhouettes(true);

        // a lone triangle: nothing to integrate, and open edges never outline
        let triangle = Mesh::new(vec![0.0, 0.0, 0.0, EDGE, 0.0, 0.0, 0.0, EDGE, 0.0], vec![0, 1, 2], vec![]).unwrap();
        surface.set_mesh(&triangle).unwrap();
        surface.render().unwrap();
        assert!(surface.get_rendered_red_channel().unwrap().iter().all(|&r| r == 0.0));
        assert!(surface.get_current_silhouettes_image().unwrap().iter().all(|&v| v == 0.0));

        // tetrahedra without a surface still integrate
        let model = SyntheticModel::tetrahedron(EDGE, 0, 1.0).unwrap();
        let volume = Mesh::new(model.mesh.vertices().to_vec(), vec![], model.mesh.tetrahedra().to_vec()).unwrap();
        surface.set_mesh(&volume).unwrap();
        surface.set_coefficients(&model.density).unwrap();
        surface.render().unwrap();
        let peak = surface
            .get_rendered_red_channel()
            .unwrap()
            .into_iter()
            .fold(0.0, f32::max);
        assert!(peak > 0.0);
        assert!(surface.get_current_silhouettes_image().unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn child_model_mutators_are_rejected() {
        // no GPU needed: ownership is checked before the context is touched
        let root = RenderSurface::new(RenderTarget::Offscreen, ContextConfig::from_env());
        let mut child = RenderSurface::with_parent(&root, RenderTarget::Offscreen);
        let model = SyntheticModel::tetrahedron(EDGE, 0, 1.0).unwrap();

        let results = [
            child.set_mesh(&model.mesh),
            child.set_mesh_with(&model.mesh, None, None),
            child.set_vertices(&model.shape),
            child.update_vertices(&model.shape),
            child.set_coefficients(&model.density),
            child.update_coefficients(&model.density),
        ];
        for result in results {
            assert!(matches!(result, Err(RenderError::NotResourceOwner(_))), "{result:?}");
        }
        assert_eq!(child.state(), NodeState::Uninitialized);
        assert_eq!(root.state(), NodeState::Uninitialized);
    }

    #[test]
    fn density_pipeline_is_reused_for_equal_count() {
        let Some(mut surface) = offscreen() else { return };
        density_only(&mut surface);

        max_red(&mut surface, 1.0);
        max_red(&mut surface, 3.0);
        let resources = surface.resources().unwrap();
        assert_eq!(resources.density_rebuild_count(), 1);
        assert_eq!(resources.density_generation_count(), 1);
    }

    #[test]
    fn recomputed_vertices_are_memoized() {
        let Some(mut surface) = offscreen() else { return };
        let mut model = SyntheticModel::tetrahedron(EDGE, 0, 1.0).unwrap();
        surface.set_mesh(&model.mesh).unwrap();
        surface.set_vertices(&model.shape).unwrap();

        let first = surface.get_recomputed_vertices(false).unwrap();
        let count = surface.resources().unwrap().model.read().shape.recompute_count();
        let second = surface.get_recomputed_vertices(false).unwrap();
        assert_eq!(first, second);
        assert_eq!(surface.resources().unwrap().model.read().shape.recompute_count(), count);

        // the only mode is the mean itself, so pcs = 1 doubles every vertex
        model.shape.update_pcs(0, 1.0).unwrap();
        surface.update_vertices(&model.shape).unwrap();
        let updated = surface.get_recomputed_vertices(false).unwrap();
        for (before, after) in first.iter().zip(&updated) {
            assert_abs_diff_eq!(after.distance(*before * 2.0), 0.0, epsilon = 1e-3);
        }
        assert_eq!(surface.resources().unwrap().model.read().shape.recompute_count(), count + 1);
    }

    #[test]
    fn crop_window_sizes_output() {
        let Some(mut surface) = offscreen() else { return };
        surface.set_render_size(64, 32).unwrap();
        surface.set_crop_window(8, 4, 16, 8).unwrap();
        assert!(surface.set_crop_window(60, 0, 8, 8).is_err());
        assert_eq!(surface.crop_rectangle(), CropWindow::validated(8, 4, 16, 8, 64, 32).unwrap());

        surface.render().unwrap();
        let image = surface.get_rendered_image().unwrap();
        assert_eq!(image.dimensions(), (16, 8));

        let max = surface.resources().unwrap().gpu.max_texture_dimension();
        assert!(matches!(
            surface.set_render_size(max + 1, 4),
            Err(RenderError::InvalidRenderSize { .. })
        ));
        // a rejected size keeps the previous one
        assert_eq!((surface.render_width(), surface.render_height()), (64, 32));
    }

    #[test]
    fn child_shares_model_and_pose() {
        let Some(mut root) = offscreen() else { return };
        let mut child = RenderSurface::with_parent(&root, RenderTarget::Offscreen);
        assert_eq!(child.role(), ResourceRole::Borrower);

        density_only(&mut root);
        density_only(&mut child);
        let (root_max, _) = max_red(&mut root, 1.0);

        let model = SyntheticModel::tetrahedron(EDGE, 0, 1.0).unwrap();
        assert!(matches!(child.set_mesh(&model.mesh), Err(RenderError::NotResourceOwner(_))));

        child.render().unwrap();
        let child_max = child
            .get_rendered_red_channel()
            .unwrap()
            .into_iter()
            .fold(0.0, f32::max);
        assert_relative_eq!(child_max, root_max, max_relative = 1e-3);
        assert!(Arc::ptr_eq(&root.resources().unwrap(), &child.resources().unwrap()));

        root.set_translation(Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(child.translation(), Vec3::new(5.0, 0.0, 0.0));

        child.set_share_transformations(false);
        root.set_rotation(Vec3::new(0.0, 0.0, 90.0));
        assert_eq!(child.rotation(), Vec3::ZERO);
    }

    #[test]
    fn stl_export_of_reconstruction() {
        let Some(mut surface) = offscreen() else { return };
        let model = SyntheticModel::tetrahedron(EDGE, 0, 1.0).unwrap();
        surface.set_mesh(&model.mesh).unwrap();
        surface.set_vertices(&model.shape).unwrap();

        let mut out = Vec::new();
        surface.write_stl(&mut out, false, None).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("facet normal").count(), 4);

        let mask = surface.get_vertices_mask(None, None).unwrap();
        assert_eq!(mask, vec![true; 4]);

        let path = std::env::temp_dir().join("ssim_renderer_surface_test.stl");
        surface.export_stl(&path, true, Some(&[true, true, true, false])).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        // only the base triangle avoids vertex 3
        assert_eq!(written.matches("facet normal").count(), 1);
    }
}
