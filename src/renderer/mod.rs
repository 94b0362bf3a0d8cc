pub mod camera;
pub mod context;
pub mod density_shader;
pub mod gpu;
pub mod model_buffers;
pub mod passes;
pub mod pipelines;
pub mod readback;
pub mod surface;
pub mod targets;

pub use camera::{FrameUniforms, Pose, Rect, ViewCamera};
pub use context::{ContextNode, NodeState, ResourceRole, SharedResources};
pub use density_shader::{DensityShaderCache, coeffs_count_from_degree, degree_from_coeffs_count};
pub use model_buffers::DiffState;
pub use surface::{OverlayFrame, RenderSurface, RenderTarget};
pub use targets::CropWindow;
