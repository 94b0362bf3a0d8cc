//! Synchronous copies from GPU textures into host memory.

use crate::error::{RenderError, RenderResult};

/// Row pitch of a buffer copy, rounded up to the copy alignment.
pub fn padded_bytes_per_row(unpadded: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Strips the per-row padding of a mapped copy.
pub fn unpad_rows(data: &[u8], unpadded: usize, padded: usize, rows: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(unpadded * rows);
    for row in 0..rows {
        let start = row * padded;
        bytes.extend_from_slice(&data[start..start + unpadded]);
    }
    bytes
}

/// Reads `width x height` texels of a 32-bit float texture with
/// `channels` components per texel, rows top to bottom.
pub fn read_texture_f32(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    channels: u32,
) -> RenderResult<Vec<f32>> {
    let unpadded = width * channels * 4;
    let padded = padded_bytes_per_row(unpadded);

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Buffer"),
        size: (padded * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let bytes = map_read(device, &buffer)?;
    let rows = unpad_rows(&bytes, unpadded as usize, padded as usize, height as usize);
    Ok(rows
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Maps `buffer` for reading and blocks until the copy is available.
fn map_read(device: &wgpu::Device, buffer: &wgpu::Buffer) -> RenderResult<Vec<u8>> {
    let slice = buffer.slice(..);
    let (sender, receiver) = crossbeam::channel::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device.poll(wgpu::Maintain::Wait);
    receiver
        .recv()
        .map_err(|e| RenderError::BufferMap(e.to_string()))?
        .map_err(|e| RenderError::BufferMap(e.to_string()))?;

    let bytes = slice.get_mapped_range().to_vec();
    buffer.unmap();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_aligned() {
        assert_eq!(padded_bytes_per_row(4), 256);
        assert_eq!(padded_bytes_per_row(256), 256);
        assert_eq!(padded_bytes_per_row(257), 512);
    }

    #[test]
    fn padding_is_removed() {
        let data: Vec<u8> = (0..16).collect();
        assert_eq!(unpad_rows(&data, 3, 8, 2), vec![0, 1, 2, 8, 9, 10]);
    }
}
