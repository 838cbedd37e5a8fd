use std::sync::Arc;

use crate::error::CaptureResult;
use crate::geometry::RegionBlit;
use crate::source::CaptureSource;

/// Pointer position reported alongside a duplicated frame, in the
/// coordinate space of the output that produced it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PointerPosition {
    pub x: i32,
    pub y: i32,
    pub visible: bool,
}

/// Per-frame information returned by a successful acquire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DuplicationFrameInfo {
    /// Desktop updates folded into this frame. Zero means only the pointer
    /// changed.
    pub accumulated_frames: u32,

    /// Bytes needed to hold the move and dirty records together.
    pub total_metadata_size: u32,

    /// Stream timestamp of the last pointer update. Zero when the pointer
    /// has not changed since the previous acquire.
    pub last_mouse_update: i64,

    pub pointer: PointerPosition,

    /// Bytes needed to fetch a new pointer shape. Zero when unchanged.
    pub pointer_shape_size: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// No new frame within the timeout.
    Timeout,

    /// Display configuration changed; the stream is unusable.
    AccessLost,

    /// A frame is held and must be released with
    /// [`OutputDuplication::release_frame`] before the next acquire.
    Acquired(DuplicationFrameInfo),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PointerShapeKind {
    /// 1bpp AND mask followed by a 1bpp XOR mask; reported height covers
    /// both masks.
    #[default]
    Monochrome,

    /// 32bpp BGRA with straight alpha.
    Color,

    /// 32bpp BGRA whose alpha byte selects XOR (opaque) or replace.
    MaskedColor,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PointerShapeInfo {
    pub kind: PointerShapeKind,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub hot_spot_x: i32,
    pub hot_spot_y: i32,
}

/// Number of metadata records fetched and the bytes they occupy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetadataRecords {
    pub count: usize,
    pub bytes: usize,
}

/// One output's change-stream.
pub trait OutputDuplication: Send {
    fn acquire_next_frame(&mut self, timeout_ms: u32) -> CaptureResult<AcquireOutcome>;

    /// Write the held frame's move records into `buffer`.
    fn move_rects(&mut self, buffer: &mut [u8]) -> CaptureResult<MetadataRecords>;

    /// Write the held frame's dirty records into `buffer`.
    fn dirty_rects(&mut self, buffer: &mut [u8]) -> CaptureResult<MetadataRecords>;

    /// Fetch the new pointer shape into `buffer`.
    fn pointer_shape(&mut self, buffer: &mut [u8]) -> CaptureResult<PointerShapeInfo>;

    /// Copy the region's source box of the held frame into the composite
    /// surface at the region's destination offset.
    fn copy_to_composite(&mut self) -> CaptureResult<()>;

    fn release_frame(&mut self) -> CaptureResult<()>;
}

/// GPU device plus the composite surface every region writes into.
pub trait CompositeDevice: Send {
    fn open_duplication(
        &mut self,
        source: &CaptureSource,
        blit: RegionBlit,
    ) -> CaptureResult<Box<dyn OutputDuplication>>;

    /// Map the composite surface and hand its rows to `sink` as
    /// `(bytes, row_pitch)`. The surface is unmapped before returning,
    /// whether or not `sink` succeeds.
    fn read_back(
        &mut self,
        sink: &mut dyn FnMut(&[u8], usize) -> CaptureResult<()>,
    ) -> CaptureResult<()>;
}

pub trait CaptureBackend: Send + Sync {
    fn enumerate_sources(&self) -> CaptureResult<Vec<CaptureSource>>;

    /// Create the device and a `width`x`height` composite surface able to
    /// receive frames from every output in `sources`.
    fn create_composite(
        &self,
        sources: &[CaptureSource],
        width: u32,
        height: u32,
    ) -> CaptureResult<Box<dyn CompositeDevice>>;
}

pub fn default_backend() -> CaptureResult<Arc<dyn CaptureBackend>> {
    crate::platform::build_backend()
}
