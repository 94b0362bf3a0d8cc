//! Headless DRR generation for the procedural box model.
//!
//! Renders one view (and optionally a second, rotated calibration view from
//! a child surface sharing the same model), writes PNGs and can export the
//! reconstructed surface as ASCII STL.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use glam::{UVec3, Vec3};

use ssim_renderer::{ContextConfig, Pyramid, RenderSurface, RenderTarget, SyntheticModel};

#[derive(Parser, Debug)]
#[command(name = "ssim-drr")]
#[command(about = "Render digitally reconstructed radiographs of a statistical shape and intensity model", long_about = None)]
struct Cli {
    /// Output PNG path
    #[arg(short, long, default_value = "drr.png")]
    output: PathBuf,

    /// Render width and height in pixels
    #[arg(long, default_value = "512")]
    size: u32,

    /// Grid cells along x, y and z
    #[arg(long, value_delimiter = ',', default_values_t = [4, 3, 3])]
    cells: Vec<u32>,

    /// Box extent along x, y and z
    #[arg(long, value_delimiter = ',', default_values_t = [120.0, 80.0, 80.0])]
    extent: Vec<f32>,

    /// Bernstein polynomial degree of the density (0..=4)
    #[arg(long, default_value = "2")]
    degree: u32,

    /// Mean density of the model
    #[arg(long, default_value = "100.0")]
    density: f32,

    /// Shape coefficients (scale, bend, twist)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    shape: Vec<f32>,

    /// Density coefficients (ramp, alternating)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    intensity_modes: Vec<f32>,

    /// Model rotation in degrees about x, y and z
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    rotation: Option<Vec<f32>>,

    /// Model translation
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    translation: Option<Vec<f32>>,

    /// Image intensity in 0..=1
    #[arg(long, default_value = "0.5")]
    intensity: f32,

    /// Silhouette line width in pixels
    #[arg(long, default_value = "1.0")]
    line_width: f32,

    /// Crop window as x,y,width,height
    #[arg(long, value_delimiter = ',')]
    crop: Option<Vec<u32>>,

    /// Mirror the model on the x axis
    #[arg(long)]
    mirror: bool,

    /// Draw shaded triangles
    #[arg(long)]
    polygonal: bool,

    #[arg(long)]
    no_silhouettes: bool,

    #[arg(long)]
    no_pyramid: bool,

    /// Also render a second view rotated by this many degrees about the
    /// detector's vertical axis, written next to the main output
    #[arg(long)]
    second_view: Option<f32>,

    /// Export the reconstructed surface as ASCII STL
    #[arg(long)]
    stl: Option<PathBuf>,

    /// Drop triangles outside the frustum from the STL
    #[arg(long)]
    mask: bool,

    /// Number of timed renders
    #[arg(long, default_value = "1")]
    repeat: u32,

    /// Use a software adapter
    #[arg(long)]
    fallback_adapter: bool,
}

fn vec3(values: &[f32], name: &str) -> Result<Vec3> {
    match values {
        [x, y, z] => Ok(Vec3::new(*x, *y, *z)),
        _ => bail!("--{name} expects three comma-separated values, got {}", values.len()),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let cells = match cli.cells.as_slice() {
        [x, y, z] => UVec3::new(*x, *y, *z),
        other => bail!("--cells expects three comma-separated values, got {}", other.len()),
    };
    let extent = vec3(&cli.extent, "extent")?;

    let mut model = SyntheticModel::boxed(cells, extent, cli.degree, cli.density).context("building the box model")?;
    if !cli.shape.is_empty() {
        model.shape.set_pcs(&cli.shape).context("applying --shape")?;
    }
    if !cli.intensity_modes.is_empty() {
        model.density.set_pcs(&cli.intensity_modes).context("applying --intensity-modes")?;
    }
    log::info!(
        "Box model: {} vertices, {} triangles, {} tetrahedra, degree {}",
        model.mesh.number_of_vertices(),
        model.mesh.number_of_triangles(),
        model.mesh.number_of_tetrahedra(),
        model.degree
    );

    let config = ContextConfig::from_env().with_fallback_adapter(cli.fallback_adapter);
    let mut surface = RenderSurface::new(RenderTarget::Offscreen, config);
    surface.initialize().context("creating the GPU context")?;

    surface.set_mesh(&model.mesh)?;
    surface.set_vertices(&model.shape)?;
    surface.set_coefficients(&model.density)?;

    surface.set_render_size(cli.size, cli.size)?;
    surface.set_intensity(cli.intensity);
    surface.set_line_width(cli.line_width);
    surface.enable_x_mirroring(cli.mirror);
    surface.enable_polygonal(cli.polygonal);
    surface.enable_silhouettes(!cli.no_silhouettes);
    surface.enable_pyramid(!cli.no_pyramid);

    if let Some(rotation) = &cli.rotation {
        surface.set_rotation(vec3(rotation, "rotation")?);
    }
    if let Some(translation) = &cli.translation {
        surface.set_translation(vec3(translation, "translation")?);
    }
    if let Some(crop) = &cli.crop {
        let [x, y, width, height] = crop.as_slice() else {
            bail!("--crop expects x,y,width,height");
        };
        surface.set_crop_window(*x, *y, *width, *height)?;
    }

    let mut total = 0.0;
    for _ in 0..cli.repeat.max(1) {
        total += surface.render()?;
    }
    println!(
        "Rendered {}x{} in {:.3} ms (mean of {})",
        surface.crop_width(),
        surface.crop_height(),
        total / cli.repeat.max(1) as f64,
        cli.repeat.max(1)
    );
    surface
        .save_rendered_image(&cli.output)
        .with_context(|| format!("writing {}", cli.output.display()))?;

    if let Some(angle) = cli.second_view {
        let mut child = RenderSurface::with_parent(&surface, RenderTarget::Offscreen);
        let pyramid: Pyramid = surface.perspective().transformed(0.0, angle, 0.0, 0.0, 0.0, 0.0);
        child.set_perspective(pyramid)?;
        child.set_render_size(cli.size, cli.size)?;
        child.set_intensity(cli.intensity);

        let ms = child.render()?;
        let path = cli.output.with_file_name(format!(
            "{}_view2.png",
            cli.output.file_stem().and_then(|s| s.to_str()).unwrap_or("drr")
        ));
        child
            .save_rendered_image(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Second view at {angle} degrees in {ms:.3} ms -> {}", path.display());
    }

    if let Some(stl) = &cli.stl {
        let mask = if cli.mask {
            Some(surface.get_vertices_mask(None, None)?)
        } else {
            None
        };
        surface
            .export_stl(stl, true, mask.as_deref())
            .with_context(|| format!("writing {}", stl.display()))?;
        println!("STL written to {}", stl.display());
    }

    Ok(())
}
