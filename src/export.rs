//! ASCII STL export of the reconstructed surface.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use glam::Vec3;

use crate::error::{RenderError, RenderResult};

const SOLID_NAME: &str = "renderer";

/// Scientific notation with six fractional digits and a signed exponent of
/// at least two digits, e.g. `-1.250000e-03`.
pub fn format_scientific(value: f32) -> String {
    let formatted = format!("{value:.6e}");
    let Some((mantissa, exponent)) = formatted.split_once('e') else {
        return formatted;
    };
    match exponent.parse::<i32>() {
        Ok(exponent) => {
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.abs())
        }
        Err(_) => formatted,
    }
}

fn write_point<W: Write>(out: &mut W, prefix: &str, p: Vec3) -> std::io::Result<()> {
    writeln!(
        out,
        "{prefix}{} {} {}",
        format_scientific(p.x),
        format_scientific(p.y),
        format_scientific(p.z)
    )
}

/// Writes one facet per triangle of `triangles` (flat, three indices each).
///
/// The first two indices of every triangle are swapped so facets face
/// outwards for the renderer's winding. A triangle is skipped when `mask`
/// excludes any of its vertices.
pub fn write_stl<W: Write>(
    out: &mut W,
    vertices: &[Vec3],
    triangles: &[u32],
    mask: Option<&[bool]>,
) -> RenderResult<()> {
    if let Some(mask) = mask {
        if mask.len() != vertices.len() {
            return Err(RenderError::ModelMismatch(format!(
                "mask has {} entries for {} vertices",
                mask.len(),
                vertices.len()
            )));
        }
    }
    if let Some(&index) = triangles.iter().find(|&&i| i as usize >= vertices.len()) {
        return Err(RenderError::InvalidMesh(format!(
            "triangle index {index} out of range for {} vertices",
            vertices.len()
        )));
    }

    writeln!(out, "solid {SOLID_NAME}")?;

    let mut written = 0usize;
    for tri in triangles.chunks_exact(3) {
        let tri = [tri[1] as usize, tri[0] as usize, tri[2] as usize];
        if mask.is_some_and(|mask| tri.iter().any(|&i| !mask[i])) {
            continue;
        }

        let [a, b, c] = tri.map(|i| vertices[i]);
        let normal = (c - a).cross(b - a).normalize_or_zero();

        write_point(out, "  facet normal ", normal)?;
        writeln!(out, "    outer loop")?;
        for v in [a, b, c] {
            write_point(out, "      vertex  ", v)?;
        }
        writeln!(out)?;
        writeln!(out, "    endloop")?;
        writeln!(out, "  endfacet")?;
        written += 1;
    }

    writeln!(out, "endsolid {SOLID_NAME}")?;
    log::debug!("STL written: {written} facets");
    Ok(())
}

pub fn export_stl(path: &Path, vertices: &[Vec3], triangles: &[u32], mask: Option<&[bool]>) -> RenderResult<()> {
    let file = File::create(path).inspect_err(|e| log::error!("Cannot open {} for writing: {e}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_stl(&mut out, vertices, triangles, mask)?;
    out.flush()?;
    log::info!("STL model saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scientific_matches_printf() {
        assert_eq!(format_scientific(1.0), "1.000000e+00");
        assert_eq!(format_scientific(0.0), "0.000000e+00");
        assert_eq!(format_scientific(-0.00125), "-1.250000e-03");
        assert_eq!(format_scientific(123456.0), "1.234560e+05");
    }

    fn triangle() -> (Vec<Vec3>, Vec<u32>) {
        (vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![0, 1, 2])
    }

    #[test]
    fn single_facet_layout() {
        let (vertices, triangles) = triangle();
        let mut out = Vec::new();
        write_stl(&mut out, &vertices, &triangles, None).unwrap();
        let text = String::from_utf8(out).unwrap();

        let expected = "solid renderer
  facet normal 0.000000e+00 0.000000e+00 1.000000e+00
    outer loop
      vertex  1.000000e+00 0.000000e+00 0.000000e+00
      vertex  0.000000e+00 0.000000e+00 0.000000e+00
      vertex  0.000000e+00 1.000000e+00 0.000000e+00

    endloop
  endfacet
endsolid renderer
";
        assert_eq!(text, expected);
    }

    #[test]
    fn masked_vertex_drops_triangle() {
        let (vertices, triangles) = triangle();
        let mut out = Vec::new();
        write_stl(&mut out, &vertices, &triangles, Some(&[true, false, true])).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "solid renderer\nendsolid renderer\n");
    }

    #[test]
    fn bad_inputs_are_rejected() {
        let (vertices, _) = triangle();
        let mut out = Vec::new();
        assert!(matches!(
            write_stl(&mut out, &vertices, &[0, 1, 3], None),
            Err(RenderError::InvalidMesh(_))
        ));
        assert!(matches!(
            write_stl(&mut out, &vertices, &[0, 1, 2], Some(&[true])),
            Err(RenderError::ModelMismatch(_))
        ));
    }
}
