use std::fmt;

#[derive(Debug)]
pub enum CaptureError {
    /// The requested rectangle cannot be placed on the virtual desktop.
    Geometry(String),

    /// Device, texture or duplication creation failed while opening.
    Resource(anyhow::Error),

    /// A change-stream reported that the display configuration changed
    /// underneath it (mode switch, session lock, output removal).
    DeviceLost {
        output: String,
    },

    /// Growing a metadata, cursor-shape or frame buffer failed.
    OutOfMemory(&'static str),

    InvalidConfig(String),

    BufferOverflow,

    /// Warm-up exhausted `MONDUP_WARMUP_POLL_LIMIT` without seeing a frame.
    WarmupTimeout {
        output: String,
        polls: u64,
    },

    /// A frame was requested after the engine was closed.
    Closed,

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureErrorClass {
    InvalidInput,
    Transient,
    Fatal,
}

impl CaptureError {
    pub fn class(&self) -> CaptureErrorClass {
        match self {
            Self::Geometry(_) | Self::InvalidConfig(_) | Self::Closed => {
                CaptureErrorClass::InvalidInput
            }
            Self::WarmupTimeout { .. } => CaptureErrorClass::Transient,
            Self::Resource(_)
            | Self::DeviceLost { .. }
            | Self::OutOfMemory(_)
            | Self::BufferOverflow
            | Self::Platform(_) => CaptureErrorClass::Fatal,
        }
    }

    /// `true` when the caller should close the engine and may reopen it.
    pub fn requires_reopen(&self) -> bool {
        matches!(
            self,
            Self::DeviceLost { .. } | Self::Resource(_) | Self::Platform(_)
        )
    }

    pub(crate) fn resource(context: impl fmt::Display, error: impl Into<anyhow::Error>) -> Self {
        Self::Resource(error.into().context(context.to_string()))
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Geometry(message) => write!(f, "invalid capture geometry: {message}"),
            Self::Resource(inner) => write!(f, "failed to acquire capture resources: {inner:#}"),
            Self::DeviceLost { output } => write!(f, "lost access to display {output}"),
            Self::OutOfMemory(what) => write!(f, "out of memory while growing {what}"),
            Self::InvalidConfig(message) => write!(f, "invalid capture configuration: {message}"),
            Self::BufferOverflow => write!(f, "frame buffer size overflow"),
            Self::WarmupTimeout { output, polls } => write!(
                f,
                "duplicator warm-up for {output} saw no frame after {polls} polls"
            ),
            Self::Closed => write!(f, "capture engine is closed"),
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Resource(inner) | Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Grow `buffer` to at least `len` zeroed bytes, mapping allocation failure
/// onto [`CaptureError::OutOfMemory`]. Never shrinks.
pub(crate) fn try_grow(buffer: &mut Vec<u8>, len: usize, what: &'static str) -> CaptureResult<()> {
    if buffer.len() >= len {
        return Ok(());
    }
    buffer
        .try_reserve_exact(len - buffer.len())
        .map_err(|_| CaptureError::OutOfMemory(what))?;
    buffer.resize(len, 0);
    Ok(())
}
