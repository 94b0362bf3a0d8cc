//! Fragment stage generator for the density pass.
//!
//! Density inside one tetrahedron is a Bernstein polynomial of degree `d` in
//! barycentric coordinates with `C = (d+1)(d+2)(d+3)/6` coefficients. The
//! generated `fs_main` integrates it in closed form along the ray segment
//! between the entry point `b_in` and the exit point `b_out`.
//!
//! Generation is pure and depends only on `C`; [`DensityShaderCache`] keeps
//! the last result so a pipeline rebuild only happens when `C` changes.

use std::fmt::Write;

/// Barycentric slack accepted on the entry face before a fragment is dropped.
const BARYCENTRIC_EPSILON: f32 = 1e-4;

pub fn coeffs_count_from_degree(degree: u32) -> u32 {
    (degree + 1) * (degree + 2) * (degree + 3) / 6
}

/// Inverse of [`coeffs_count_from_degree`]. Logs a warning and returns
/// `None` when `count` is not produced by any degree.
pub fn degree_from_coeffs_count(count: u32) -> Option<u32> {
    if count == 0 {
        log::warn!("Wrong coefficients count: 0");
        return None;
    }

    let mut degree = 0;
    while count != coeffs_count_from_degree(degree) {
        degree += 1;
        if count < coeffs_count_from_degree(degree) {
            log::warn!("Wrong coefficients count: {count}");
            return None;
        }
    }
    Some(degree)
}

/// All `(i, j, k, l)` with `i + j + k + l == degree`, lexicographic with `l`
/// running fastest. This is the order of coefficients inside a tetrahedron.
pub fn bernstein_tuples(degree: u32) -> Vec<[u32; 4]> {
    let mut tuples = Vec::with_capacity(coeffs_count_from_degree(degree) as usize);
    for i in 0..=degree {
        for j in 0..=degree {
            for k in 0..=degree {
                for l in 0..=degree {
                    if i + j + k + l == degree {
                        tuples.push([i, j, k, l]);
                    }
                }
            }
        }
    }
    tuples
}

/// Tuples of every lower degree that are component-wise `<= tuple`, in
/// degree then enumeration order, followed by `tuple` itself.
pub fn dominated_tuples(tuple: [u32; 4]) -> Vec<[u32; 4]> {
    let degree: u32 = tuple.iter().sum();
    let mut result: Vec<[u32; 4]> = (0..degree)
        .flat_map(bernstein_tuples)
        .filter(|q| q.iter().zip(&tuple).all(|(a, b)| a <= b))
        .collect();
    result.push(tuple);
    result
}

fn factorial(n: u32) -> u64 {
    (1..=n as u64).product()
}

/// `|t|! / (t0! t1! t2! t3!)`
pub fn multinomial(tuple: [u32; 4]) -> u64 {
    let degree: u32 = tuple.iter().sum();
    factorial(degree) / tuple.iter().map(|&t| factorial(t)).product::<u64>()
}

const COMPONENTS: [char; 4] = ['x', 'y', 'z', 'w'];

fn pow_variables(source: &mut String, degree: u32, base: &str) {
    for component in COMPONENTS {
        for e in 1..=degree {
            if e == 1 {
                let _ = writeln!(source, "    let {base}_{component}1 = {base}.{component};");
            } else {
                let _ = writeln!(
                    source,
                    "    let {base}_{component}{e} = {base}_{component}{} * {base}.{component};",
                    e - 1
                );
            }
        }
    }
}

fn push_factors(factors: &mut Vec<String>, tuple: [u32; 4], base: &str) {
    for (component, exponent) in COMPONENTS.iter().zip(tuple) {
        if exponent > 0 {
            factors.push(format!("{base}_{component}{exponent}"));
        }
    }
    let m = multinomial(tuple);
    if m != 1 {
        factors.push(format!("{m}.0"));
    }
}

/// Product `B_q(b_in) * B_{k-q}(b_out)` without the `1 / (d+1)` scale.
fn term(k: [u32; 4], q: [u32; 4]) -> String {
    let rest = [k[0] - q[0], k[1] - q[1], k[2] - q[2], k[3] - q[3]];
    let mut factors = Vec::new();
    push_factors(&mut factors, q, "b_in");
    push_factors(&mut factors, rest, "b_out");
    if factors.is_empty() {
        "1.0".to_string()
    } else {
        factors.join(" * ")
    }
}

/// WGSL source of `fs_main` for `count` coefficients per tetrahedron.
///
/// An invalid or zero count yields a stage that only writes path length and
/// depth.
pub fn generate_density_fragment(count: u32) -> String {
    let degree = if count == 0 {
        None
    } else {
        degree_from_coeffs_count(count)
    };

    let mut source = String::new();
    let _ = write!(
        source,
        "@fragment\n\
         fn fs_main(in: DensityVertexOutput) -> @location(0) vec4<f32> {{\n\
         \x20   var out_color = vec4<f32>(0.0, 0.0, 0.0, in.position.z);\n\
         \n\
         \x20   var b_in = in.b;\n\
         \x20   if (any(b_in < vec4<f32>({neg:?})) || any(b_in > vec4<f32>({pos:?}))) {{\n\
         \x20       discard;\n\
         \x20   }}\n\
         \x20   b_in = clamp(b_in, vec4<f32>(0.0), vec4<f32>(1.0));\n\
         \n\
         \x20   let s_if = exit_factor(b_in, in.b_eyedir);\n\
         \x20   if (s_if <= 0.0) {{\n\
         \x20       discard;\n\
         \x20   }}\n\
         \x20   let w_length = length(in.e_eyedir) / s_if;\n\
         \x20   let b_out = b_in + in.b_eyedir / s_if;\n\
         \x20   out_color.g = w_length;\n",
        neg = -BARYCENTRIC_EPSILON,
        pos = 1.0 + BARYCENTRIC_EPSILON,
    );

    if let Some(degree) = degree {
        let tuples = bernstein_tuples(degree);

        source.push('\n');
        pow_variables(&mut source, degree, "b_in");
        pow_variables(&mut source, degree, "b_out");
        let _ = write!(
            source,
            "\n\
             \x20   var sum = 0.0;\n\
             \x20   var sum2 = 0.0;\n\
             \x20   var c = 0.0;\n\
             \x20   var index = 0u;\n\
             \x20   let index_part = in.tet_id * {count}u;\n\
             \n"
        );

        for (c, &k) in tuples.iter().enumerate() {
            let _ = write!(
                source,
                "    index = index_part + {c}u;\n\
                 \x20   c = bern_coeffs[index] + textureLoad(density_diff, vec2<u32>(index & packing.mask, index >> packing.log2), 0).x;\n\
                 \x20   sum2 = 0.0;\n"
            );
            for q in dominated_tuples(k) {
                let _ = writeln!(source, "    sum2 += {};", term(k, q));
            }
            source.push_str("    sum += c * sum2;\n\n");
        }

        let scale = 1.0f32 / (degree as f32 + 1.0);
        let _ = writeln!(source, "    out_color.r = sum * w_length * {scale:?};");
    }

    source.push_str("\n    return out_color;\n}\n");
    source
}

/// Memoized [`generate_density_fragment`], keyed by coefficient count.
#[derive(Default)]
pub struct DensityShaderCache {
    last: Option<(u32, String)>,
    generation_count: usize,
}

impl DensityShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&mut self, count: u32) -> &str {
        let stale = !matches!(&self.last, Some((cached, _)) if *cached == count);
        if stale {
            self.generation_count += 1;
            log::debug!("Generating density stage for {count} coefficients");
            self.last = Some((count, generate_density_fragment(count)));
        }
        match &self.last {
            Some((_, source)) => source,
            None => "",
        }
    }

    pub fn last_count(&self) -> Option<u32> {
        self.last.as_ref().map(|(count, _)| *count)
    }

    /// Number of times the enumeration actually ran.
    pub fn generation_count(&self) -> usize {
        self.generation_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degree_and_count_are_inverse() {
        for degree in 0..=6 {
            let count = coeffs_count_from_degree(degree);
            assert_eq!(degree_from_coeffs_count(count), Some(degree));
        }
        assert_eq!(coeffs_count_from_degree(0), 1);
        assert_eq!(coeffs_count_from_degree(1), 4);
        assert_eq!(coeffs_count_from_degree(3), 20);
    }

    #[test]
    fn invalid_counts_are_rejected() {
        for count in [0, 2, 3, 5, 9, 11, 19, 21, 83] {
            assert_eq!(degree_from_coeffs_count(count), None, "count {count}");
        }
    }

    #[test]
    fn tuples_are_lexicographic() {
        assert_eq!(
            bernstein_tuples(1),
            vec![[0, 0, 0, 1], [0, 0, 1, 0], [0, 1, 0, 0], [1, 0, 0, 0]]
        );
        for degree in 0..=5 {
            let tuples = bernstein_tuples(degree);
            assert_eq!(tuples.len() as u32, coeffs_count_from_degree(degree));
            assert!(tuples.windows(2).all(|w| w[0] < w[1]));
            assert!(tuples.iter().all(|t| t.iter().sum::<u32>() == degree));
        }
    }

    #[test]
    fn dominated_lists_end_with_tuple() {
        assert_eq!(dominated_tuples([0, 0, 0, 0]), vec![[0, 0, 0, 0]]);
        assert_eq!(dominated_tuples([1, 0, 0, 0]), vec![[0, 0, 0, 0], [1, 0, 0, 0]]);
        assert_eq!(
            dominated_tuples([1, 1, 0, 0]),
            vec![[0, 0, 0, 0], [0, 1, 0, 0], [1, 0, 0, 0], [1, 1, 0, 0]]
        );
        // every tuple of degree < 2 below [2,0,0,0]
        assert_eq!(dominated_tuples([2, 0, 0, 0]).len(), 3);
    }

    #[test]
    fn multinomials() {
        assert_eq!(multinomial([0, 0, 0, 0]), 1);
        assert_eq!(multinomial([1, 1, 0, 0]), 2);
        assert_eq!(multinomial([2, 1, 0, 0]), 3);
        assert_eq!(multinomial([1, 1, 1, 1]), 24);
        assert_eq!(multinomial([6, 0, 0, 0]), 1);
    }

    #[test]
    fn terms_have_no_unit_factors() {
        assert_eq!(term([0, 0, 0, 0], [0, 0, 0, 0]), "1.0");
        assert_eq!(term([1, 0, 0, 0], [0, 0, 0, 0]), "b_out_x1");
        assert_eq!(term([1, 0, 0, 0], [1, 0, 0, 0]), "b_in_x1");
        assert_eq!(term([1, 1, 0, 0], [0, 0, 0, 0]), "b_out_x1 * b_out_y1 * 2.0");
        assert_eq!(term([2, 1, 0, 0], [1, 0, 0, 0]), "b_in_x1 * b_out_x1 * b_out_y1 * 2.0");
        assert_eq!(term([0, 0, 3, 0], [0, 0, 1, 0]), "b_in_z1 * b_out_z2");
    }

    #[test]
    fn constant_density_stage() {
        let source = generate_density_fragment(1);
        assert!(source.contains("let index_part = in.tet_id * 1u;"));
        assert!(source.contains("sum2 += 1.0;"));
        assert!(source.contains("out_color.r = sum * w_length * 1.0;"));
        assert!(!source.contains("b_in_x1"));
    }

    #[test]
    fn linear_density_stage() {
        let source = generate_density_fragment(4);
        assert!(source.contains("let b_in_x1 = b_in.x;"));
        assert!(source.contains("let b_out_w1 = b_out.w;"));
        assert!(!source.contains("b_in_x2"));
        assert!(source.contains("index = index_part + 3u;"));
        assert!(!source.contains("index = index_part + 4u;"));
        assert!(source.contains("out_color.r = sum * w_length * 0.5;"));
        // 4 coefficients with 2 terms each
        assert_eq!(source.matches("sum2 += ").count(), 8);
    }

    #[test]
    fn cubic_stage_uses_powers() {
        let source = generate_density_fragment(20);
        assert!(source.contains("let b_in_x3 = b_in_x2 * b_in.x;"));
        assert!(source.contains("out_color.r = sum * w_length * 0.25;"));
    }

    #[test]
    fn invalid_count_yields_header_only() {
        for count in [0, 7] {
            let source = generate_density_fragment(count);
            assert!(source.contains("out_color.g = w_length;"));
            assert!(source.contains("return out_color;"));
            assert!(!source.contains("sum2"));
        }
    }

    #[test]
    fn cache_regenerates_only_on_count_change() {
        let mut cache = DensityShaderCache::new();
        let first = cache.source(10).to_string();
        let second = cache.source(10).to_string();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(cache.generation_count(), 1);

        cache.source(4);
        assert_eq!(cache.generation_count(), 2);
        assert_eq!(cache.last_count(), Some(4));

        let again = cache.source(10).to_string();
        assert_eq!(again, first);
        assert_eq!(cache.generation_count(), 3);
    }
}
