use crate::error::{RenderError, RenderResult};
use crate::renderer::pipelines::{DEPTH_FORMAT, LAYER_FORMAT, OUTPUT_FORMAT, Pipelines, SILHOUETTE_FORMAT};

/// Sub-rectangle of the render target copied into the output, top-left
/// origin, in texels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropWindow {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Accepts the window only if it lies fully inside a
    /// `render_width x render_height` target.
    pub fn validated(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        render_width: u32,
        render_height: u32,
    ) -> RenderResult<Self> {
        let fits_x = x < render_width && width >= 1 && x.checked_add(width).is_some_and(|r| r <= render_width);
        let fits_y = y < render_height && height >= 1 && y.checked_add(height).is_some_and(|b| b <= render_height);
        if fits_x && fits_y {
            Ok(Self { x, y, width, height })
        } else {
            Err(RenderError::InvalidCropWindow(format!(
                "{width}x{height}+{x}+{y} outside {render_width}x{render_height}"
            )))
        }
    }

    pub fn uniform(&self) -> [u32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

pub struct Layer {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl Layer {
    fn new(device: &wgpu::Device, label: &str, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

fn create_depth_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

/// Intermediate layers at full render size and the cropped output.
pub struct RenderTargets {
    pub width: u32,
    pub height: u32,
    pub pyramid: Layer,
    pub density: Layer,
    pub polygonal: Layer,
    pub silhouettes: Layer,
    pub depth: wgpu::TextureView,
    pub layers_bind_group: wgpu::BindGroup,

    pub crop: CropWindow,
    pub output: Layer,
    pub output_bind_group: wgpu::BindGroup,
}

impl RenderTargets {
    pub fn new(device: &wgpu::Device, pipelines: &Pipelines, width: u32, height: u32, crop: CropWindow) -> Self {
        let pyramid = Layer::new(device, "Pyramid Layer", width, height, LAYER_FORMAT);
        let density = Layer::new(device, "Density Layer", width, height, LAYER_FORMAT);
        let polygonal = Layer::new(device, "Polygonal Layer", width, height, LAYER_FORMAT);
        let silhouettes = Layer::new(device, "Silhouettes Layer", width, height, SILHOUETTE_FORMAT);
        let depth = create_depth_texture(device, width, height);

        let layers_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Layers Bind Group"),
            layout: &pipelines.layers_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&pyramid.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&density.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&polygonal.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&silhouettes.view),
                },
            ],
        });

        let (output, output_bind_group) = create_output(device, pipelines, crop);
        log::debug!("Render targets {width}x{height}, output {}x{}", crop.width, crop.height);

        Self {
            width,
            height,
            pyramid,
            density,
            polygonal,
            silhouettes,
            depth,
            layers_bind_group,
            crop,
            output,
            output_bind_group,
        }
    }

    /// Recreates the output when the crop size changed. Only the origin
    /// moving needs nothing beyond the uniform update.
    pub fn set_crop(&mut self, device: &wgpu::Device, pipelines: &Pipelines, crop: CropWindow) {
        if (crop.width, crop.height) != (self.crop.width, self.crop.height) {
            let (output, bind_group) = create_output(device, pipelines, crop);
            self.output = output;
            self.output_bind_group = bind_group;
        }
        self.crop = crop;
    }
}

fn create_output(device: &wgpu::Device, pipelines: &Pipelines, crop: CropWindow) -> (Layer, wgpu::BindGroup) {
    let output = Layer::new(device, "Output Texture", crop.width, crop.height, OUTPUT_FORMAT);
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Output Bind Group"),
        layout: &pipelines.blit_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::TextureView(&output.view),
        }],
    });
    (output, bind_group)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_inside_target_is_accepted() {
        let crop = CropWindow::validated(10, 20, 100, 50, 512, 512).unwrap();
        assert_eq!(crop.uniform(), [10, 20, 100, 50]);
        assert!(CropWindow::validated(0, 0, 512, 512, 512, 512).is_ok());
        assert!(CropWindow::validated(511, 511, 1, 1, 512, 512).is_ok());
    }

    #[test]
    fn crop_outside_target_is_rejected() {
        for (x, y, w, h) in [
            (512, 0, 1, 1),
            (0, 512, 1, 1),
            (0, 0, 0, 10),
            (0, 0, 10, 0),
            (500, 0, 13, 1),
            (0, 500, 1, 13),
            (1, 1, u32::MAX, 1),
        ] {
            assert!(
                matches!(CropWindow::validated(x, y, w, h, 512, 512), Err(RenderError::InvalidCropWindow(_))),
                "{x} {y} {w} {h}"
            );
        }
    }
}
