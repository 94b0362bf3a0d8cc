use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("failed to create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    #[error("render size {width}x{height} outside 1..={max}")]
    InvalidRenderSize { width: u32, height: u32, max: u32 },

    #[error("invalid crop window: {0}")]
    InvalidCropWindow(String),

    #[error("no mesh bound")]
    MissingMesh,

    #[error("no statistical data bound")]
    MissingStatisticalData,

    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    #[error("model mismatch: {0}")]
    ModelMismatch(String),

    #[error("parameter index {index} out of range (count {count})")]
    ParameterIndexOutOfRange { index: usize, count: usize },

    #[error("degenerate frustum: {0}")]
    DegenerateFrustum(String),

    #[error("shader `{label}` failed to compile: {message}")]
    ShaderCompilation { label: String, message: String },

    #[error("buffer map failed: {0}")]
    BufferMap(String),

    /// Raised when a sharing child tries to replace model resources owned by the root.
    #[error("{0} must be called on the root surface")]
    NotResourceOwner(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type RenderResult<T> = Result<T, RenderError>;
