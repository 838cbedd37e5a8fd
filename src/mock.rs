//! In-memory backend used by unit tests.
//!
//! Each mock output owns a script of acquire outcomes. A scripted desktop
//! frame carries a fill byte; copying it writes that byte over the region's
//! destination box of a shared [`MockSurface`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{
    AcquireOutcome, CaptureBackend, CompositeDevice, DuplicationFrameInfo, MetadataRecords,
    OutputDuplication, PointerPosition, PointerShapeInfo,
};
use crate::error::{CaptureError, CaptureResult};
use crate::geometry::RegionBlit;
use crate::pacing::Clock;
use crate::source::CaptureSource;

pub(crate) const MOVE_RECORD_BYTES: usize = 24;
pub(crate) const DIRTY_RECORD_BYTES: usize = 16;
const SURFACE_PADDING_BYTE: u8 = 0xEE;

#[derive(Clone, Debug)]
pub(crate) struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            now: Arc::new(AtomicI64::new(0)),
        }
    }

    pub(crate) fn advance_us(&self, micros: i64) {
        self.now.fetch_add(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_us(&self, micros: u64) {
        self.advance_us(micros as i64);
    }
}

#[derive(Debug)]
struct SurfaceData {
    width: u32,
    height: u32,
    pitch: usize,
    bytes: Vec<u8>,
}

/// Shared BGRA surface standing in for the GPU composite texture.
#[derive(Clone, Debug)]
pub(crate) struct MockSurface {
    data: Arc<Mutex<SurfaceData>>,
}

impl MockSurface {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self::with_pitch(width, height, width as usize * 4)
    }

    pub(crate) fn with_pitch(width: u32, height: u32, pitch: usize) -> Self {
        let mut bytes = vec![SURFACE_PADDING_BYTE; pitch * height as usize];
        for row in bytes.chunks_mut(pitch) {
            row[..width as usize * 4].fill(0);
        }
        Self {
            data: Arc::new(Mutex::new(SurfaceData {
                width,
                height,
                pitch,
                bytes,
            })),
        }
    }

    pub(crate) fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let data = self.data.lock().unwrap();
        let offset = y as usize * data.pitch + x as usize * 4;
        let mut pixel = [0u8; 4];
        pixel.copy_from_slice(&data.bytes[offset..offset + 4]);
        pixel
    }

    fn write_box(&self, blit: RegionBlit, fill: u8) -> CaptureResult<()> {
        let mut data = self.data.lock().unwrap();
        if blit.dst_x + blit.width > data.width || blit.dst_y + blit.height > data.height {
            return Err(CaptureError::BufferOverflow);
        }
        let pitch = data.pitch;
        for y in blit.dst_y..blit.dst_y + blit.height {
            let start = y as usize * pitch + blit.dst_x as usize * 4;
            data.bytes[start..start + blit.width as usize * 4].fill(fill);
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub(crate) enum ScriptedFrame {
    Timeout,
    AccessLost,
    Frame {
        info: DuplicationFrameInfo,
        moves: usize,
        dirty: usize,
        fill: u8,
        shape: Option<(PointerShapeInfo, Vec<u8>)>,
    },
}

impl ScriptedFrame {
    pub(crate) fn desktop(accumulated: u32, moves: usize, dirty: usize, fill: u8) -> Self {
        Self::Frame {
            info: DuplicationFrameInfo {
                accumulated_frames: accumulated,
                total_metadata_size: (moves * MOVE_RECORD_BYTES + dirty * DIRTY_RECORD_BYTES)
                    as u32,
                ..Default::default()
            },
            moves,
            dirty,
            fill,
            shape: None,
        }
    }

    pub(crate) fn with_pointer(mut self, timestamp: i64, position: PointerPosition) -> Self {
        if let Self::Frame { info, .. } = &mut self {
            info.last_mouse_update = timestamp;
            info.pointer = position;
        }
        self
    }

    pub(crate) fn with_shape(mut self, shape_info: PointerShapeInfo, bytes: Vec<u8>) -> Self {
        if let Self::Frame { info, shape, .. } = &mut self {
            info.pointer_shape_size = bytes.len() as u32;
            *shape = Some((shape_info, bytes));
        }
        self
    }
}

#[derive(Debug, Default)]
struct DuplicationState {
    script: VecDeque<ScriptedFrame>,
    held: Option<ScriptedFrame>,
    acquires: usize,
    releases: usize,
    fail_copies: bool,
}

/// Scripted change-stream. Clones share state so tests can keep a handle.
#[derive(Clone, Debug)]
pub(crate) struct MockDuplication {
    surface: MockSurface,
    blit: RegionBlit,
    output_width: u32,
    output_height: u32,
    state: Arc<Mutex<DuplicationState>>,
}

impl MockDuplication {
    pub(crate) fn new(
        surface: MockSurface,
        blit: RegionBlit,
        output_width: u32,
        output_height: u32,
        script: Vec<ScriptedFrame>,
    ) -> Self {
        Self {
            surface,
            blit,
            output_width,
            output_height,
            state: Arc::new(Mutex::new(DuplicationState {
                script: script.into(),
                ..Default::default()
            })),
        }
    }

    pub(crate) fn acquire_count(&self) -> usize {
        self.state.lock().unwrap().acquires
    }

    pub(crate) fn release_count(&self) -> usize {
        self.state.lock().unwrap().releases
    }

    pub(crate) fn fail_copies(&self) {
        self.state.lock().unwrap().fail_copies = true;
    }

    pub(crate) fn push(&self, frame: ScriptedFrame) {
        self.state.lock().unwrap().script.push_back(frame);
    }

    fn held_counts(&self) -> CaptureResult<(usize, usize)> {
        match &self.state.lock().unwrap().held {
            Some(ScriptedFrame::Frame { moves, dirty, .. }) => Ok((*moves, *dirty)),
            _ => Err(no_frame_held()),
        }
    }
}

fn no_frame_held() -> CaptureError {
    CaptureError::Platform(anyhow::anyhow!("mock duplication holds no frame"))
}

fn fill_records(buffer: &mut [u8], count: usize, record: usize) -> CaptureResult<MetadataRecords> {
    let bytes = count * record;
    if buffer.len() < bytes {
        return Err(CaptureError::Platform(anyhow::anyhow!(
            "metadata buffer too small: {} < {bytes}",
            buffer.len()
        )));
    }
    buffer[..bytes].fill(0xAB);
    Ok(MetadataRecords { count, bytes })
}

impl OutputDuplication for MockDuplication {
    fn acquire_next_frame(&mut self, _timeout_ms: u32) -> CaptureResult<AcquireOutcome> {
        let mut state = self.state.lock().unwrap();
        state.acquires += 1;
        if state.held.is_some() {
            return Err(CaptureError::Platform(anyhow::anyhow!(
                "previous frame was not released"
            )));
        }
        match state.script.pop_front() {
            None | Some(ScriptedFrame::Timeout) => Ok(AcquireOutcome::Timeout),
            Some(ScriptedFrame::AccessLost) => Ok(AcquireOutcome::AccessLost),
            Some(frame) => {
                let info = match &frame {
                    ScriptedFrame::Frame { info, .. } => *info,
                    _ => DuplicationFrameInfo::default(),
                };
                state.held = Some(frame);
                Ok(AcquireOutcome::Acquired(info))
            }
        }
    }

    fn move_rects(&mut self, buffer: &mut [u8]) -> CaptureResult<MetadataRecords> {
        let (moves, _) = self.held_counts()?;
        fill_records(buffer, moves, MOVE_RECORD_BYTES)
    }

    fn dirty_rects(&mut self, buffer: &mut [u8]) -> CaptureResult<MetadataRecords> {
        let (_, dirty) = self.held_counts()?;
        fill_records(buffer, dirty, DIRTY_RECORD_BYTES)
    }

    fn pointer_shape(&mut self, buffer: &mut [u8]) -> CaptureResult<PointerShapeInfo> {
        let state = self.state.lock().unwrap();
        match &state.held {
            Some(ScriptedFrame::Frame {
                shape: Some((info, bytes)),
                ..
            }) => {
                buffer[..bytes.len()].copy_from_slice(bytes);
                Ok(*info)
            }
            _ => Err(no_frame_held()),
        }
    }

    fn copy_to_composite(&mut self) -> CaptureResult<()> {
        let fill = {
            let state = self.state.lock().unwrap();
            if state.fail_copies {
                return Err(CaptureError::Platform(anyhow::anyhow!("mock copy failure")));
            }
            match &state.held {
                Some(ScriptedFrame::Frame { fill, .. }) => *fill,
                _ => return Err(no_frame_held()),
            }
        };
        if self.blit.src_x + self.blit.width > self.output_width
            || self.blit.src_y + self.blit.height > self.output_height
        {
            return Err(CaptureError::BufferOverflow);
        }
        self.surface.write_box(self.blit, fill)
    }

    fn release_frame(&mut self) -> CaptureResult<()> {
        let mut state = self.state.lock().unwrap();
        state.held.take().ok_or_else(no_frame_held)?;
        state.releases += 1;
        Ok(())
    }
}

/// Counts live native-handle stand-ins.
#[derive(Debug)]
struct HandleGuard {
    live: Arc<AtomicUsize>,
}

impl HandleGuard {
    fn new(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            live: Arc::clone(live),
        }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct TrackedDuplication {
    inner: MockDuplication,
    _guard: HandleGuard,
}

impl OutputDuplication for TrackedDuplication {
    fn acquire_next_frame(&mut self, timeout_ms: u32) -> CaptureResult<AcquireOutcome> {
        self.inner.acquire_next_frame(timeout_ms)
    }

    fn move_rects(&mut self, buffer: &mut [u8]) -> CaptureResult<MetadataRecords> {
        self.inner.move_rects(buffer)
    }

    fn dirty_rects(&mut self, buffer: &mut [u8]) -> CaptureResult<MetadataRecords> {
        self.inner.dirty_rects(buffer)
    }

    fn pointer_shape(&mut self, buffer: &mut [u8]) -> CaptureResult<PointerShapeInfo> {
        self.inner.pointer_shape(buffer)
    }

    fn copy_to_composite(&mut self) -> CaptureResult<()> {
        self.inner.copy_to_composite()
    }

    fn release_frame(&mut self) -> CaptureResult<()> {
        self.inner.release_frame()
    }
}

#[derive(Debug)]
struct OutputScript {
    source: CaptureSource,
    frames: Vec<ScriptedFrame>,
    fail_open: bool,
}

#[derive(Debug, Default)]
struct BackendShared {
    outputs: Vec<OutputScript>,
    surface_pitch_padding: usize,
    opened_streams: Vec<(u32, MockDuplication)>,
    composites_created: usize,
}

/// Scripted [`CaptureBackend`]. Every native object it hands out holds a
/// guard so tests can assert that all of them were released.
#[derive(Clone, Debug, Default)]
pub(crate) struct MockBackend {
    shared: Arc<Mutex<BackendShared>>,
    live: Arc<AtomicUsize>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_output(self, source: CaptureSource, frames: Vec<ScriptedFrame>) -> Self {
        self.shared.lock().unwrap().outputs.push(OutputScript {
            source,
            frames,
            fail_open: false,
        });
        self
    }

    pub(crate) fn failing_open(self, output_index: u32) -> Self {
        for output in &mut self.shared.lock().unwrap().outputs {
            if output.source.output_index() == output_index {
                output.fail_open = true;
            }
        }
        self
    }

    pub(crate) fn with_pitch_padding(self, bytes: usize) -> Self {
        self.shared.lock().unwrap().surface_pitch_padding = bytes;
        self
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn composites_created(&self) -> usize {
        self.shared.lock().unwrap().composites_created
    }

    /// Handle sharing state with the duplication opened for `output_index`.
    pub(crate) fn duplication(&self, output_index: u32) -> Option<MockDuplication> {
        self.shared
            .lock()
            .unwrap()
            .opened_streams
            .iter()
            .find(|(index, _)| *index == output_index)
            .map(|(_, stream)| stream.clone())
    }
}

impl CaptureBackend for MockBackend {
    fn enumerate_sources(&self) -> CaptureResult<Vec<CaptureSource>> {
        Ok(self
            .shared
            .lock()
            .unwrap()
            .outputs
            .iter()
            .map(|output| output.source.clone())
            .collect())
    }

    fn create_composite(
        &self,
        _sources: &[CaptureSource],
        width: u32,
        height: u32,
    ) -> CaptureResult<Box<dyn CompositeDevice>> {
        let mut shared = self.shared.lock().unwrap();
        let pitch = width as usize * 4 + shared.surface_pitch_padding;
        let surface = MockSurface::with_pitch(width, height, pitch);
        shared.composites_created += 1;
        Ok(Box::new(MockComposite {
            backend: self.clone(),
            surface,
            _guard: HandleGuard::new(&self.live),
        }))
    }
}

struct MockComposite {
    backend: MockBackend,
    surface: MockSurface,
    _guard: HandleGuard,
}

impl CompositeDevice for MockComposite {
    fn open_duplication(
        &mut self,
        source: &CaptureSource,
        blit: RegionBlit,
    ) -> CaptureResult<Box<dyn OutputDuplication>> {
        let mut shared = self.backend.shared.lock().unwrap();
        let output = shared
            .outputs
            .iter()
            .find(|output| output.source == *source)
            .ok_or_else(|| {
                CaptureError::resource("unknown mock output", anyhow::anyhow!("{source}"))
            })?;
        if output.fail_open {
            return Err(CaptureError::resource(
                format!("failed to duplicate {}", source.describe()),
                anyhow::anyhow!("mock duplication refused"),
            ));
        }
        let rect = source.rect();
        let duplication = MockDuplication::new(
            self.surface.clone(),
            blit,
            rect.width(),
            rect.height(),
            output.frames.clone(),
        );
        shared
            .opened_streams
            .push((source.output_index(), duplication.clone()));
        Ok(Box::new(TrackedDuplication {
            inner: duplication,
            _guard: HandleGuard::new(&self.backend.live),
        }))
    }

    fn read_back(
        &mut self,
        sink: &mut dyn FnMut(&[u8], usize) -> CaptureResult<()>,
    ) -> CaptureResult<()> {
        let data = self.surface.data.lock().unwrap();
        sink(&data.bytes, data.pitch)
    }
}
