use crate::backend::{AcquireOutcome, DuplicationFrameInfo, OutputDuplication};
use crate::cursor::CursorState;
use crate::error::{CaptureError, CaptureResult, try_grow};
use crate::geometry::{RegionBlit, RegionPlan};
use crate::source::CaptureSource;

/// Polls never block; pacing owns all waiting.
const POLL_TIMEOUT_MS: u32 = 0;

/// Outcome of one non-blocking poll of a region's change-stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegionPoll {
    /// The region's overlap rectangle was copied into the composite surface.
    pub content_changed: bool,
    /// The pointer moved, changed visibility, or changed shape.
    pub cursor_changed: bool,
}

/// One output's share of the capture: its change-stream plus the overlap
/// rectangle it feeds into the composite surface.
pub struct CaptureRegion {
    source: CaptureSource,
    blit: RegionBlit,
    duplication: Box<dyn OutputDuplication>,
    /// Scratch space for move and dirty records. Grows, never shrinks.
    metadata: Vec<u8>,
    accumulated_frames: u64,
    /// The composite holds at least one copy of this region.
    populated: bool,
}

impl CaptureRegion {
    pub(crate) fn new(plan: RegionPlan, duplication: Box<dyn OutputDuplication>) -> Self {
        Self {
            source: plan.source,
            blit: plan.blit,
            duplication,
            metadata: Vec::new(),
            accumulated_frames: 0,
            populated: false,
        }
    }

    pub fn source(&self) -> &CaptureSource {
        &self.source
    }

    pub fn blit(&self) -> RegionBlit {
        self.blit
    }

    pub fn accumulated_frames(&self) -> u64 {
        self.accumulated_frames
    }

    pub fn metadata_capacity(&self) -> usize {
        self.metadata.len()
    }

    /// Poll once without waiting. A timeout is an unchanged region, not an
    /// error. Any acquired frame is released before returning, including
    /// when processing it fails.
    pub(crate) fn poll(&mut self, cursor: Option<&mut CursorState>) -> CaptureResult<RegionPoll> {
        let info = match self.duplication.acquire_next_frame(POLL_TIMEOUT_MS)? {
            AcquireOutcome::Timeout => return Ok(RegionPoll::default()),
            AcquireOutcome::AccessLost => {
                log::warn!("lost access to {}", self.source.describe());
                return Err(CaptureError::DeviceLost {
                    output: self.source.name().to_string(),
                });
            }
            AcquireOutcome::Acquired(info) => info,
        };

        let processed = self.process_frame(&info, cursor);
        let released = self.duplication.release_frame();
        let poll = processed?;
        released?;
        Ok(poll)
    }

    fn process_frame(
        &mut self,
        info: &DuplicationFrameInfo,
        cursor: Option<&mut CursorState>,
    ) -> CaptureResult<RegionPoll> {
        self.accumulated_frames = self
            .accumulated_frames
            .saturating_add(u64::from(info.accumulated_frames));

        let mut move_count = 0;
        let mut dirty_count = 0;
        if info.total_metadata_size > 0 {
            let required = info.total_metadata_size as usize;
            try_grow(&mut self.metadata, required, "frame metadata buffer")?;
            let metadata = &mut self.metadata[..required];
            let moves = self.duplication.move_rects(metadata)?;
            move_count = moves.count;
            let dirty_space = metadata.get_mut(moves.bytes..).unwrap_or_default();
            dirty_count = self.duplication.dirty_rects(dirty_space)?.count;
        }

        let cursor_changed = match cursor {
            Some(cursor) => {
                cursor.observe(info, self.blit.source_to_composite(), self.duplication.as_mut())?
            }
            None => false,
        };

        // Any change record means the whole overlap rectangle is recopied.
        let content_changed = move_count > 0 || dirty_count > 0 || !self.populated;
        if content_changed {
            self.duplication.copy_to_composite()?;
            self.populated = true;
        }

        Ok(RegionPoll {
            content_changed,
            cursor_changed,
        })
    }

    /// Poll until the stream has produced at least one desktop frame, so
    /// the composite surface starts populated. `poll_limit` caps the number
    /// of polls; `None` waits indefinitely.
    pub(crate) fn warm_up(
        &mut self,
        mut cursor: Option<&mut CursorState>,
        poll_limit: Option<u64>,
    ) -> CaptureResult<()> {
        let mut polls = 0u64;
        while self.accumulated_frames == 0 {
            if let Some(limit) = poll_limit
                && polls >= limit
            {
                return Err(CaptureError::WarmupTimeout {
                    output: self.source.name().to_string(),
                    polls,
                });
            }
            self.poll(cursor.as_deref_mut())?;
            polls += 1;
            if self.accumulated_frames == 0 {
                std::thread::yield_now();
            }
        }
        log::debug!(
            "{} warmed up after {polls} polls ({} accumulated frames)",
            self.source.describe(),
            self.accumulated_frames
        );
        Ok(())
    }
}

impl std::fmt::Debug for CaptureRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureRegion")
            .field("source", &self.source)
            .field("blit", &self.blit)
            .field("accumulated_frames", &self.accumulated_frames)
            .field("populated", &self.populated)
            .finish_non_exhaustive()
    }
}
