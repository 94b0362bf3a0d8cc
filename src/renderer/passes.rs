//! Command encoding for every pass of a frame.
//!
//! Layer passes load their targets; [`encode_clear`] runs first and clears
//! all of them together with the depth buffer.

use crate::renderer::model_buffers::{DiffChannel, ModelBuffers};
use crate::renderer::pipelines::Pipelines;
use crate::renderer::targets::RenderTargets;

/// Vertices per tetrahedron instance: four faces of three.
const DENSITY_VERTICES: u32 = 12;
/// Vertices per adjacency instance: three edges of two.
const SILHOUETTE_VERTICES: u32 = 6;

fn layer_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    view: &wgpu::TextureView,
    depth: &wgpu::TextureView,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: depth,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

/// Recomputes `basis * pcs` of one channel into its packed texture.
pub fn encode_diff(encoder: &mut wgpu::CommandEncoder, pipelines: &Pipelines, channel: &DiffChannel) {
    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Diff Render Pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: &channel.view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });

    render_pass.set_pipeline(&pipelines.diff);
    render_pass.set_bind_group(0, &channel.bind_group, &[]);
    render_pass.draw(0..3, 0..1);
}

pub fn encode_clear(encoder: &mut wgpu::CommandEncoder, targets: &RenderTargets) {
    let clear = wgpu::Operations {
        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
        store: wgpu::StoreOp::Store,
    };
    let attachment = |view| {
        Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: clear,
        })
    };

    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Clear Render Pass"),
        color_attachments: &[
            attachment(&targets.pyramid.view),
            attachment(&targets.density.view),
            attachment(&targets.polygonal.view),
            attachment(&targets.silhouettes.view),
        ],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &targets.depth,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}

pub fn encode_pyramid(
    encoder: &mut wgpu::CommandEncoder,
    pipelines: &Pipelines,
    targets: &RenderTargets,
    frame: &wgpu::BindGroup,
) {
    let mut render_pass = layer_pass(encoder, "Pyramid Render Pass", &targets.pyramid.view, &targets.depth);
    render_pass.set_pipeline(&pipelines.pyramid);
    render_pass.set_bind_group(0, frame, &[]);
    render_pass.draw(0..6, 0..1);
}

pub fn encode_density(
    encoder: &mut wgpu::CommandEncoder,
    pipeline: &wgpu::RenderPipeline,
    targets: &RenderTargets,
    frame: &wgpu::BindGroup,
    model: &ModelBuffers,
    tetrahedron_count: u32,
) {
    let mut render_pass = layer_pass(encoder, "Density Render Pass", &targets.density.view, &targets.depth);
    render_pass.set_pipeline(pipeline);
    render_pass.set_bind_group(0, frame, &[]);
    render_pass.set_bind_group(1, model.bind_group(), &[]);
    render_pass.draw(0..DENSITY_VERTICES, 0..tetrahedron_count);
}

pub fn encode_polygonal(
    encoder: &mut wgpu::CommandEncoder,
    pipelines: &Pipelines,
    targets: &RenderTargets,
    frame: &wgpu::BindGroup,
    model: &ModelBuffers,
) {
    let Some(mesh) = &model.mesh else {
        return;
    };

    let mut render_pass = layer_pass(encoder, "Polygonal Render Pass", &targets.polygonal.view, &targets.depth);
    render_pass.set_pipeline(&pipelines.polygonal);
    render_pass.set_bind_group(0, frame, &[]);
    render_pass.set_bind_group(1, model.bind_group(), &[]);
    render_pass.set_vertex_buffer(0, mesh.vertices.slice(..));
    render_pass.set_vertex_buffer(1, mesh.colors.slice(..));
    render_pass.set_vertex_buffer(2, mesh.normals.slice(..));
    render_pass.set_index_buffer(mesh.triangles.slice(..), wgpu::IndexFormat::Uint32);
    render_pass.draw_indexed(0..mesh.triangle_index_count, 0, 0..1);
}

pub fn encode_silhouettes(
    encoder: &mut wgpu::CommandEncoder,
    pipelines: &Pipelines,
    targets: &RenderTargets,
    frame: &wgpu::BindGroup,
    model: &ModelBuffers,
    adjacency_count: u32,
) {
    let mut render_pass = layer_pass(encoder, "Silhouettes Render Pass", &targets.silhouettes.view, &targets.depth);
    render_pass.set_pipeline(&pipelines.silhouettes);
    render_pass.set_bind_group(0, frame, &[]);
    render_pass.set_bind_group(1, model.bind_group(), &[]);
    render_pass.draw(0..SILHOUETTE_VERTICES, 0..adjacency_count);
}

/// Blends the layers inside the crop window into the output texture.
pub fn encode_composite(
    encoder: &mut wgpu::CommandEncoder,
    pipelines: &Pipelines,
    targets: &RenderTargets,
    frame: &wgpu::BindGroup,
) {
    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Composite Render Pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: &targets.output.view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });

    render_pass.set_pipeline(&pipelines.composite);
    render_pass.set_bind_group(0, frame, &[]);
    render_pass.set_bind_group(1, &targets.layers_bind_group, &[]);
    render_pass.draw(0..3, 0..1);
}

/// Copies the output onto a window surface.
pub fn encode_blit(
    encoder: &mut wgpu::CommandEncoder,
    pipeline: &wgpu::RenderPipeline,
    targets: &RenderTargets,
    view: &wgpu::TextureView,
) {
    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Blit Render Pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });

    render_pass.set_pipeline(pipeline);
    render_pass.set_bind_group(0, &targets.output_bind_group, &[]);
    render_pass.draw(0..3, 0..1);
}
