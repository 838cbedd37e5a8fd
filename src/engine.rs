use std::sync::Arc;

use crate::backend::{self, CaptureBackend, CompositeDevice};
use crate::cursor::CursorState;
use crate::env_config::{self, define_env_flag};
use crate::error::{CaptureError, CaptureResult};
use crate::geometry::{CaptureGeometry, CaptureTarget, GeometryRequest, resolve_geometry};
use crate::pacing::{Clock, Framerate, MonotonicClock, PacingState};
use crate::region::{CaptureRegion, RegionPoll};
use crate::source::{CaptureSource, SourceDescriptor};
use crate::surface::FrameBuffers;

define_env_flag!(enabled_when(
    log_frame_timings,
    env_config::LOG_FRAME_TIMINGS_VAR
));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    pub framerate: Framerate,
    /// Explicit capture size. `None` uses the full size of the output that
    /// contains the offset point.
    pub capture_size: Option<(u32, u32)>,
    pub offset_x: i32,
    pub offset_y: i32,
    pub draw_mouse: bool,
    pub target: CaptureTarget,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            framerate: Framerate::default(),
            capture_size: None,
            offset_x: 0,
            offset_y: 0,
            draw_mouse: true,
            target: CaptureTarget::WholeDesktop,
        }
    }
}

impl CaptureConfig {
    fn geometry_request(&self) -> GeometryRequest {
        GeometryRequest {
            target: self.target,
            offset_x: self.offset_x,
            offset_y: self.offset_y,
            size: self.capture_size,
        }
    }
}

/// What a host needs to describe the stream. Pixels are always BGRA.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub frame_size: usize,
    pub framerate: Framerate,
}

/// Per-frame diagnostic timings in microseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameTimings {
    /// Polling every region, including composite copies.
    pub grab_us: i64,
    /// Read-back and cursor overlay.
    pub copy_us: i64,
    /// From the end of the pacing wait to the frame being ready.
    pub total_us: i64,
}

/// A produced frame. `data` is tightly packed BGRA, `width * 4` bytes per
/// row, and stays valid until the next call on the engine.
#[derive(Debug)]
pub struct CapturedFrame<'a> {
    /// Microseconds since the engine was opened.
    pub timestamp_us: i64,
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// `false` when nothing changed and the previous image was reused.
    pub is_new: bool,
    pub timings: FrameTimings,
}

#[derive(Clone, Copy, Debug)]
struct FrameReport {
    timestamp_us: i64,
    is_new: bool,
    timings: FrameTimings,
}

/// Everything acquired at open. Field order is drop order: change-streams
/// go first, then the composite surface and its device.
struct EngineState {
    regions: Vec<CaptureRegion>,
    composite: Box<dyn CompositeDevice>,
    frames: FrameBuffers,
    cursor: CursorState,
    pacing: PacingState,
    clock: Box<dyn Clock>,
    draw_mouse: bool,
    needs_readback: bool,
    needs_present: bool,
    has_frame: bool,
}

impl EngineState {
    fn render_pass(&mut self) -> CaptureResult<RegionPoll> {
        let mut pass = RegionPoll::default();
        for region in &mut self.regions {
            let cursor = self.draw_mouse.then_some(&mut self.cursor);
            let poll = region.poll(cursor)?;
            pass.content_changed |= poll.content_changed;
            pass.cursor_changed |= poll.cursor_changed;
        }
        Ok(pass)
    }

    fn produce(&mut self) -> CaptureResult<FrameReport> {
        let schedule = self.pacing.wait_for_next(self.clock.as_ref());
        let started = self.clock.now_us();

        loop {
            let pass = self.render_pass()?;
            self.needs_readback |= pass.content_changed;
            self.needs_present |= pass.cursor_changed;
            if self.has_frame || self.needs_readback {
                break;
            }
            std::thread::yield_now();
        }
        let grabbed = self.clock.now_us();

        let mut is_new = false;
        if self.needs_readback {
            let frames = &mut self.frames;
            self.composite.read_back(&mut |bytes: &[u8], pitch: usize| {
                frames.fill_from_surface(bytes, pitch)
            })?;
            self.needs_readback = false;
            self.needs_present = true;
        }
        if self.needs_present {
            let cursor = self.draw_mouse.then_some(&self.cursor);
            self.frames.present(cursor);
            self.needs_present = false;
            self.has_frame = true;
            is_new = true;
        }
        let finished = self.clock.now_us();

        let timings = FrameTimings {
            grab_us: grabbed - started,
            copy_us: finished - grabbed,
            total_us: finished - started,
        };
        if log_frame_timings() {
            log::trace!(
                "frame at {}us: slept {}us, grab {}us, copy {}us, total {}us, new={is_new}",
                schedule.timestamp_us,
                schedule.slept_us,
                timings.grab_us,
                timings.copy_us,
                timings.total_us
            );
        }

        Ok(FrameReport {
            timestamp_us: schedule.timestamp_us,
            is_new,
            timings,
        })
    }
}

/// Multi-output capture engine: resolves geometry, owns one change-stream
/// per overlapping output, and emits paced BGRA frames of the target
/// rectangle.
pub struct CaptureEngine {
    state: Option<EngineState>,
    geometry: CaptureGeometry,
    info: StreamInfo,
}

impl CaptureEngine {
    pub fn builder() -> CaptureEngineBuilder {
        CaptureEngineBuilder::new()
    }

    fn open(
        config: CaptureConfig,
        backend: &dyn CaptureBackend,
        clock: Option<Box<dyn Clock>>,
    ) -> CaptureResult<Self> {
        let sources = backend.enumerate_sources()?;
        let geometry = resolve_geometry(&sources, &config.geometry_request())?;
        let (width, height) = (geometry.output_width(), geometry.output_height());
        log::info!(
            "capturing {} ({}x{}) from {} region(s) at {} fps; desktop extents {}",
            geometry.target,
            width,
            height,
            geometry.regions.len(),
            config.framerate,
            geometry.desktop_extents
        );

        let region_sources: Vec<CaptureSource> = geometry
            .regions
            .iter()
            .map(|plan| plan.source.clone())
            .collect();
        if let Some(first) = region_sources.first()
            && let Some(other) = region_sources
                .iter()
                .find(|source| source.adapter_index() != first.adapter_index())
        {
            return Err(CaptureError::resource(
                "capture regions must share one adapter",
                anyhow::anyhow!(
                    "{} and {} are on different adapters",
                    first.describe(),
                    other.describe()
                ),
            ));
        }

        let frames = FrameBuffers::new(width, height)?;
        let mut composite = backend.create_composite(&region_sources, width, height)?;

        let mut regions = Vec::with_capacity(geometry.regions.len());
        for plan in &geometry.regions {
            log::debug!(
                "region {}: src ({},{}) -> dst ({},{}) {}x{}",
                plan.source.describe(),
                plan.blit.src_x,
                plan.blit.src_y,
                plan.blit.dst_x,
                plan.blit.dst_y,
                plan.blit.width,
                plan.blit.height
            );
            match composite.open_duplication(&plan.source, plan.blit) {
                Ok(duplication) => regions.push(CaptureRegion::new(plan.clone(), duplication)),
                Err(error) => {
                    log::warn!(
                        "failed to open {}; releasing {} opened region(s)",
                        plan.source.describe(),
                        regions.len()
                    );
                    drop(regions);
                    drop(composite);
                    return Err(error);
                }
            }
        }

        let mut cursor = CursorState::new();
        let poll_limit = env_config::env_var_positive_u64(env_config::WARMUP_POLL_LIMIT_VAR);
        for index in 0..regions.len() {
            let tracked = config.draw_mouse.then_some(&mut cursor);
            if let Err(error) = regions[index].warm_up(tracked, poll_limit) {
                log::warn!(
                    "warm-up failed for {}; releasing {} region(s)",
                    regions[index].source().describe(),
                    regions.len()
                );
                drop(regions);
                drop(composite);
                return Err(error);
            }
        }

        let info = StreamInfo {
            width,
            height,
            frame_size: frames.frame_size(),
            framerate: config.framerate,
        };
        let clock = clock.unwrap_or_else(|| Box::new(MonotonicClock::new()));
        Ok(Self {
            state: Some(EngineState {
                regions,
                composite,
                frames,
                cursor,
                pacing: PacingState::new(config.framerate),
                clock,
                draw_mouse: config.draw_mouse,
                needs_readback: true,
                needs_present: false,
                has_frame: false,
            }),
            geometry,
            info,
        })
    }

    pub fn info(&self) -> StreamInfo {
        self.info
    }

    pub fn geometry(&self) -> &CaptureGeometry {
        &self.geometry
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Wait until the next frame is due, then poll every region and
    /// return the current image.
    ///
    /// Any error is fatal: the engine releases its resources and further
    /// calls return [`CaptureError::Closed`].
    pub fn next_frame(&mut self) -> CaptureResult<CapturedFrame<'_>> {
        let report = match self.state.as_mut() {
            Some(state) => state.produce(),
            None => return Err(CaptureError::Closed),
        };
        let report = match report {
            Ok(report) => report,
            Err(error) => {
                log::warn!("capture stream terminated: {error}");
                self.close();
                return Err(error);
            }
        };

        let state = self.state.as_ref().ok_or(CaptureError::Closed)?;
        Ok(CapturedFrame {
            timestamp_us: report.timestamp_us,
            data: state.frames.presented(),
            width: self.info.width,
            height: self.info.height,
            is_new: report.is_new,
            timings: report.timings,
        })
    }

    /// Release every change-stream, the composite surface and the frame
    /// buffers. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(state) = self.state.take() {
            log::info!("closing capture of {}", self.geometry.target);
            drop(state);
        }
    }
}

impl std::fmt::Debug for CaptureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEngine")
            .field("geometry", &self.geometry)
            .field("info", &self.info)
            .field("open", &self.is_open())
            .finish()
    }
}

pub struct CaptureEngineBuilder {
    backend_override: Option<Arc<dyn CaptureBackend>>,
    clock: Option<Box<dyn Clock>>,
    config: CaptureConfig,
}

impl CaptureEngineBuilder {
    pub fn new() -> Self {
        Self {
            backend_override: None,
            clock: None,
            config: CaptureConfig::default(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn CaptureBackend>) -> Self {
        self.backend_override = Some(backend);
        self
    }

    /// Replace the monotonic clock used for pacing and timestamps.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: CaptureConfig) -> Self {
        self.config = config;
        self
    }

    pub fn framerate(mut self, framerate: Framerate) -> Self {
        self.config.framerate = framerate;
        self
    }

    pub fn capture_size(mut self, width: u32, height: u32) -> Self {
        self.config.capture_size = Some((width, height));
        self
    }

    pub fn offset(mut self, x: i32, y: i32) -> Self {
        self.config.offset_x = x;
        self.config.offset_y = y;
        self
    }

    pub fn draw_mouse(mut self, enabled: bool) -> Self {
        self.config.draw_mouse = enabled;
        self
    }

    pub fn target(mut self, target: CaptureTarget) -> Self {
        self.config.target = target;
        self
    }

    /// Resolve geometry, acquire every resource and warm up the streams.
    pub fn build(self) -> CaptureResult<CaptureEngine> {
        let backend = match self.backend_override {
            Some(backend) => backend,
            None => backend::default_backend()?,
        };
        CaptureEngine::open(self.config, backend.as_ref(), self.clock)
    }
}

impl Default for CaptureEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// List the outputs available for capture on the default backend.
pub fn list_sources() -> CaptureResult<Vec<SourceDescriptor>> {
    list_sources_with(backend::default_backend()?.as_ref())
}

pub fn list_sources_with(backend: &dyn CaptureBackend) -> CaptureResult<Vec<SourceDescriptor>> {
    Ok(backend
        .enumerate_sources()?
        .iter()
        .map(SourceDescriptor::from)
        .collect())
}
