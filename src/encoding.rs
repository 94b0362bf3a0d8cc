//! Packing of long linear arrays into 2D textures.
//!
//! Element `i` lives at column `i & (width - 1)`, row `i >> log2(width)`.
//! The same mask/shift pair is uploaded to every shader that reads a packed
//! texture, see [`PackingUniform`].

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackedLayout {
    width: u32,
    log2: u32,
    mask: u32,
}

impl PackedLayout {
    /// Layout for a power-of-two `width`. Returns `None` otherwise.
    pub fn new(width: u32) -> Option<Self> {
        if width == 0 || !width.is_power_of_two() {
            return None;
        }
        Some(Self {
            width,
            log2: width.trailing_zeros(),
            mask: width - 1,
        })
    }

    /// Widest layout fitting in a texture of `max_dimension` texels.
    pub fn for_max_dimension(max_dimension: u32) -> Self {
        let max_dimension = max_dimension.max(1);
        let width = if max_dimension.is_power_of_two() {
            max_dimension
        } else {
            1 << (31 - max_dimension.leading_zeros())
        };
        Self {
            width,
            log2: width.trailing_zeros(),
            mask: width - 1,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn log2(&self) -> u32 {
        self.log2
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Column and row of linear index `i`.
    pub fn coords(&self, i: u32) -> (u32, u32) {
        (i & self.mask, i >> self.log2)
    }

    pub fn index(&self, column: u32, row: u32) -> u32 {
        (row << self.log2) | (column & self.mask)
    }

    /// Rows needed for `len` elements, at least one.
    pub fn height_for(&self, len: usize) -> u32 {
        let width = self.width as usize;
        (len.div_ceil(width)).max(1) as u32
    }

    /// Copy `values` into a zero-padded `width * height_for(len)` block.
    pub fn pack(&self, values: &[f32]) -> Vec<f32> {
        let total = self.width as usize * self.height_for(values.len()) as usize;
        let mut packed = vec![0.0; total];
        packed[..values.len()].copy_from_slice(values);
        packed
    }

    /// Inverse of [`PackedLayout::pack`] for the first `len` elements.
    ///
    /// `rows` holds texel rows of `row_stride` floats each, which may exceed
    /// the layout width when rows were padded for a GPU copy.
    pub fn unpack(&self, rows: &[f32], row_stride: usize, len: usize) -> Vec<f32> {
        (0..len as u32)
            .map(|i| {
                let (column, row) = self.coords(i);
                rows.get(row as usize * row_stride + column as usize)
                    .copied()
                    .unwrap_or(0.0)
            })
            .collect()
    }

    pub fn uniform(&self) -> PackingUniform {
        PackingUniform {
            log2: self.log2,
            mask: self.mask,
            width: self.width,
            _pad: 0,
        }
    }
}

/// Shader-side mirror of [`PackedLayout`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PackingUniform {
    pub log2: u32,
    pub mask: u32,
    pub width: u32,
    pub _pad: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two() {
        assert!(PackedLayout::new(0).is_none());
        assert!(PackedLayout::new(1000).is_none());
        assert_eq!(PackedLayout::new(1024).map(|l| l.log2()), Some(10));
    }

    #[test]
    fn max_dimension_rounds_down() {
        assert_eq!(PackedLayout::for_max_dimension(8192).width(), 8192);
        assert_eq!(PackedLayout::for_max_dimension(5000).width(), 4096);
        assert_eq!(PackedLayout::for_max_dimension(0).width(), 1);
    }

    #[test]
    fn coords_round_trip() {
        for width in [1u32, 2, 8, 64, 4096] {
            let layout = PackedLayout::new(width).unwrap();
            for n in [1usize, 7, 100, 4097] {
                for i in 0..n as u32 {
                    let (column, row) = layout.coords(i);
                    assert!(column < width);
                    assert_eq!(layout.index(column, row), i);
                }
                let height = layout.height_for(n);
                let (_, last_row) = layout.coords(n as u32 - 1);
                assert_eq!(height, last_row + 1);
            }
        }
    }

    #[test]
    fn pack_and_unpack_with_row_padding() {
        let layout = PackedLayout::new(4).unwrap();
        let values: Vec<f32> = (0..10).map(|v| v as f32).collect();
        let packed = layout.pack(&values);
        assert_eq!(packed.len(), 12);
        assert_eq!(&packed[10..], &[0.0, 0.0]);

        // simulate a copy with 6-float row stride
        let mut padded = Vec::new();
        for row in packed.chunks(4) {
            padded.extend_from_slice(row);
            padded.extend_from_slice(&[-1.0, -1.0]);
        }
        assert_eq!(layout.unpack(&padded, 6, values.len()), values);
    }

    #[test]
    fn uniform_carries_mask_and_shift() {
        let layout = PackedLayout::new(256).unwrap();
        let uniform = layout.uniform();
        assert_eq!(uniform.log2, 8);
        assert_eq!(uniform.mask, 255);
        assert_eq!(uniform.width, 256);
    }
}
