use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Initialization variants (`UnsupportedEnvironment`, `DeviceRequest`,
/// `ShaderCompilation`) are fatal. Fetch and decode failures for single
/// images never leave the texture store; they are logged and retried later.
#[derive(Debug, Error)]
pub enum MosaicError {
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    #[error("could not create GPU device: {0}")]
    DeviceRequest(String),

    #[error("shader compilation failed: {0}")]
    ShaderCompilation(String),

    #[error("surface error: {0}")]
    Surface(String),

    #[error("rectangle extent must be positive, got {w}x{h}")]
    InvalidRectangle { w: f32, h: f32 },

    #[error("fetching {what} failed: {reason}")]
    Fetch { what: String, reason: String },

    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("malformed wire payload: {0}")]
    Wire(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("atlas worker unavailable: {0}")]
    Worker(String),

    #[error("texture of {width}x{height} exceeds the device limit of {max}")]
    TextureTooLarge { width: u32, height: u32, max: u32 },

    #[error("unknown texture handle {0}")]
    UnknownTexture(u32),

    #[error("no collection open")]
    NoCollection,
}

impl From<rmp_serde::decode::Error> for MosaicError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        MosaicError::Wire(err.to_string())
    }
}

impl From<serde_json::Error> for MosaicError {
    fn from(err: serde_json::Error) -> Self {
        MosaicError::Wire(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MosaicError>;
