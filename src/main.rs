use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use glam::{UVec3, Vec2, Vec3};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{DeviceEvent, ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use ssim_renderer::renderer::OverlayFrame;
use ssim_renderer::{ContextConfig, Pyramid, RenderResult, RenderSurface, RenderTarget, SyntheticModel};

mod ui;

use ui::{FrameStats, UiActions, UiState, apply_theme, draw_help_overlay, draw_side_panel};

const ORBIT_DEGREES_PER_PIXEL: f32 = 0.25;
const DOLLY_PER_LINE: f32 = 20.0;

#[derive(Default)]
struct InputState {
    orbiting: bool,
    mouse_delta: Vec2,
}

struct App {
    window: Option<Arc<Window>>,
    surface: Option<RenderSurface>,
    egui_state: Option<egui_winit::State>,
    egui_renderer: Option<egui_wgpu::Renderer>,
    egui_ctx: egui::Context,

    model: SyntheticModel,
    focus: Vec3,
    ui_state: UiState,
    input: InputState,
    stats: FrameStats,

    frame_count: u32,
    fps_timer: Instant,
}

impl App {
    fn new(model: SyntheticModel) -> Self {
        let focus = (model.mesh.min_vertex() + model.mesh.max_vertex()) / 2.0;
        let ui_state = UiState::new(model.shape.number_of_parameters(), model.density.number_of_parameters());
        let stats = FrameStats {
            vertices: model.mesh.number_of_vertices(),
            tetrahedra: model.mesh.number_of_tetrahedra(),
            ..Default::default()
        };

        Self {
            window: None,
            surface: None,
            egui_state: None,
            egui_renderer: None,
            egui_ctx: egui::Context::default(),

            model,
            focus,
            ui_state,
            input: InputState::default(),
            stats,

            frame_count: 0,
            fps_timer: Instant::now(),
        }
    }

    fn init_gpu(&mut self, window: Arc<Window>) -> RenderResult<()> {
        let mut surface = RenderSurface::new(RenderTarget::Window(window.clone()), ContextConfig::from_env());
        surface.set_mesh(&self.model.mesh)?;
        surface.set_vertices(&self.model.shape)?;
        surface.set_coefficients(&self.model.density)?;

        let resources = surface.resources()?;
        let format = surface.surface_format().unwrap_or(wgpu::TextureFormat::Bgra8Unorm);

        let egui_state = egui_winit::State::new(
            self.egui_ctx.clone(),
            self.egui_ctx.viewport_id(),
            &window,
            Some(window.scale_factor() as f32),
            None,
            Some(2048),
        );
        let egui_renderer = egui_wgpu::Renderer::new(resources.device(), format, None, 1, false);

        apply_theme(&self.egui_ctx);

        self.window = Some(window);
        self.surface = Some(surface);
        self.egui_state = Some(egui_state);
        self.egui_renderer = Some(egui_renderer);
        Ok(())
    }

    fn apply_input(&mut self) {
        let Some(surface) = &mut self.surface else { return };
        let delta = std::mem::take(&mut self.input.mouse_delta);
        if delta == Vec2::ZERO {
            return;
        }
        let degrees = delta * ORBIT_DEGREES_PER_PIXEL;
        if let Err(e) = surface.rotate_camera(-degrees.y, -degrees.x, self.focus) {
            log::warn!("Camera orbit rejected: {e}");
        }
    }

    fn handle_ui_actions(&mut self, actions: UiActions) -> RenderResult<()> {
        let Some(surface) = &mut self.surface else {
            return Ok(());
        };
        let state = &self.ui_state;

        if actions.settings_changed {
            surface.enable_density(state.density);
            surface.enable_silhouettes(state.silhouettes);
            surface.enable_polygonal(state.polygonal);
            surface.enable_pyramid(state.pyramid);
            surface.enable_x_mirroring(state.x_mirroring);
            surface.enable_polygonal_lighting(state.polygonal_lighting);
            surface.set_intensity(state.intensity);
            surface.set_line_width(state.line_width);
        }

        if actions.shape_changed {
            self.model.shape.set_pcs(&state.shape_pcs)?;
            surface.update_vertices(&self.model.shape)?;
        }

        if actions.density_changed {
            self.model.density.set_pcs(&state.density_pcs)?;
            surface.update_coefficients(&self.model.density)?;
        }

        if actions.pose_changed {
            surface.set_rotation(Vec3::from_array(state.rotation));
            surface.set_translation(Vec3::from_array(state.translation));
        }

        if actions.render_size_changed {
            surface.set_render_size(state.render_size, state.render_size)?;
        }

        if actions.reset_camera {
            let pyramid = *surface.perspective();
            surface.set_camera_pyramid(&pyramid)?;
        }

        if actions.save_image {
            surface.save_rendered_image(&PathBuf::from("drr.png"))?;
        }

        if actions.export_stl {
            let mask = surface.get_vertices_mask(None, None)?;
            surface.export_stl(&PathBuf::from("model.stl"), true, Some(&mask))?;
        }

        Ok(())
    }

    fn render(&mut self) {
        self.apply_input();

        let (Some(window), Some(egui_state)) = (&self.window, &mut self.egui_state) else {
            return;
        };

        let raw_input = egui_state.take_egui_input(window);
        let eye = self.surface.as_ref().map(|s| s.eye().to_array()).unwrap_or_default();
        let stats = self.stats;

        let mut ui_actions = UiActions::default();
        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            ui_actions = draw_side_panel(ctx, &mut self.ui_state, &stats);
            draw_help_overlay(ctx, eye);
        });

        if let Err(e) = self.handle_ui_actions(ui_actions) {
            log::error!("{e}");
        }

        let (Some(window), Some(egui_state), Some(egui_renderer), Some(surface)) = (
            &self.window,
            &mut self.egui_state,
            &mut self.egui_renderer,
            &mut self.surface,
        ) else {
            return;
        };

        egui_state.handle_platform_output(window, full_output.platform_output);

        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);
        let pixels_per_point = full_output.pixels_per_point;
        let textures_delta = full_output.textures_delta;

        let rendered = surface.render_with_overlay(|frame: &mut OverlayFrame<'_>| {
            let screen_descriptor = egui_wgpu::ScreenDescriptor {
                size_in_pixels: [frame.width, frame.height],
                pixels_per_point,
            };

            for (id, delta) in &textures_delta.set {
                egui_renderer.update_texture(frame.device, frame.queue, *id, delta);
            }
            egui_renderer.update_buffers(frame.device, frame.queue, frame.encoder, &paint_jobs, &screen_descriptor);

            let render_pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: frame.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let mut render_pass = render_pass.forget_lifetime();
            egui_renderer.render(&mut render_pass, &paint_jobs, &screen_descriptor);
        });

        for id in &textures_delta.free {
            egui_renderer.free_texture(id);
        }

        match rendered {
            Ok(ms) => self.stats.render_ms = ms,
            Err(e) => log::error!("Render failed: {e}"),
        }

        self.frame_count += 1;
        let elapsed = self.fps_timer.elapsed().as_secs_f32();
        if elapsed >= 0.5 {
            self.stats.fps = self.frame_count as f32 / elapsed;
            self.frame_count = 0;
            self.fps_timer = Instant::now();
        }

        window.request_redraw();
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        match key {
            KeyCode::Escape => event_loop.exit(),
            KeyCode::KeyR => {
                self.ui_state.reset_pose();
                let actions = UiActions {
                    pose_changed: true,
                    reset_camera: true,
                    ..Default::default()
                };
                if let Err(e) = self.handle_ui_actions(actions) {
                    log::error!("{e}");
                }
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attrs = Window::default_attributes()
            .with_title("SSIM Viewer")
            .with_inner_size(PhysicalSize::new(1280, 860));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Cannot create window: {e}");
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_gpu(window) {
            log::error!("GPU initialization failed: {e}");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let (Some(egui_state), Some(window)) = (&mut self.egui_state, &self.window) {
            let response = egui_state.on_window_event(window, &event);
            if response.consumed {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),

            WindowEvent::Resized(size) => {
                if let Some(surface) = &mut self.surface {
                    surface.resize_window(size.width, size.height);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if event.state == ElementState::Pressed {
                        self.handle_key(event_loop, key);
                    }
                }
            }

            WindowEvent::MouseInput {
                button: MouseButton::Right,
                state,
                ..
            } => {
                self.input.orbiting = state == ElementState::Pressed;
            }

            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 50.0,
                };
                if let Some(surface) = &mut self.surface {
                    if let Err(e) = surface.move_camera(-lines * DOLLY_PER_LINE, self.focus) {
                        log::warn!("Camera dolly rejected: {e}");
                    }
                }
            }

            WindowEvent::RedrawRequested => self.render(),

            _ => {}
        }
    }

    fn device_event(&mut self, _: &ActiveEventLoop, _: winit::event::DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if self.input.orbiting {
                self.input.mouse_delta.x += delta.0 as f32;
                self.input.mouse_delta.y += delta.1 as f32;
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let model = SyntheticModel::boxed(UVec3::new(4, 3, 3), Vec3::new(120.0, 80.0, 80.0), 2, 100.0)
        .context("building the demo model")?;
    log::info!(
        "Demo model: {} vertices, {} tetrahedra, default frustum eye {}",
        model.mesh.number_of_vertices(),
        model.mesh.number_of_tetrahedra(),
        Pyramid::default().eye()
    );

    let event_loop = EventLoop::new().context("creating the event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(model);
    event_loop.run_app(&mut app).context("running the event loop")?;
    Ok(())
}
