//! GPU rendering of statistical shape and intensity models.
//!
//! A tetrahedral [`Mesh`] and two linear [`StatisticalData`] models (shape
//! and density) are uploaded once; [`RenderSurface`] then produces
//! digitally reconstructed radiographs for any coefficient vector without
//! reconstructing the model on the host.

pub mod config;
pub mod encoding;
pub mod error;
pub mod export;
pub mod model;
pub mod renderer;

pub use config::{ContextConfig, RenderSettings};
pub use encoding::PackedLayout;
pub use error::{RenderError, RenderResult};
pub use model::{Mesh, ModelId, Pyramid, StatisticalData, SyntheticModel};
pub use renderer::{CropWindow, Rect, RenderSurface, RenderTarget};
