use std::sync::OnceLock;

use rayon::prelude::*;

use crate::cursor::CursorState;
use crate::error::{CaptureError, CaptureResult};

pub(crate) const BYTES_PER_PIXEL: usize = 4;

/// Below this many bytes a read-back is copied on the calling thread.
const PARALLEL_COPY_MIN_BYTES: usize = 4 * 1024 * 1024;
const PARALLEL_COPY_MIN_ROWS_PER_WORKER: usize = 32;

#[inline]
fn copy_workers() -> usize {
    static WORKERS: OnceLock<usize> = OnceLock::new();
    *WORKERS.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

#[inline]
fn should_parallelize(total_bytes: usize, rows: usize) -> bool {
    let workers = copy_workers();
    workers > 1
        && total_bytes >= PARALLEL_COPY_MIN_BYTES
        && rows >= PARALLEL_COPY_MIN_ROWS_PER_WORKER.saturating_mul(workers)
}

/// Copy a `width`x`height` BGRA image whose rows are `src_pitch` bytes
/// apart into a tightly packed `dst`. Padding past `width*4` in each source
/// row is dropped.
pub fn copy_rows(
    src: &[u8],
    src_pitch: usize,
    dst: &mut [u8],
    width: u32,
    height: u32,
) -> CaptureResult<()> {
    let row_bytes = (width as usize)
        .checked_mul(BYTES_PER_PIXEL)
        .ok_or(CaptureError::BufferOverflow)?;
    let rows = height as usize;
    let dst_len = row_bytes
        .checked_mul(rows)
        .ok_or(CaptureError::BufferOverflow)?;
    if rows == 0 || row_bytes == 0 {
        return Ok(());
    }
    if src_pitch < row_bytes || dst.len() < dst_len {
        return Err(CaptureError::BufferOverflow);
    }
    // The last row only needs `row_bytes`; drivers may not pad it.
    let src_len = src_pitch
        .checked_mul(rows - 1)
        .and_then(|len| len.checked_add(row_bytes))
        .ok_or(CaptureError::BufferOverflow)?;
    if src.len() < src_len {
        return Err(CaptureError::BufferOverflow);
    }

    let dst = &mut dst[..dst_len];
    if src_pitch == row_bytes {
        dst.copy_from_slice(&src[..dst_len]);
        return Ok(());
    }

    let copy_row = |(y, row): (usize, &mut [u8])| {
        let start = y * src_pitch;
        row.copy_from_slice(&src[start..start + row_bytes]);
    };
    if should_parallelize(dst_len, rows) {
        dst.par_chunks_mut(row_bytes).enumerate().for_each(copy_row);
    } else {
        dst.chunks_mut(row_bytes).enumerate().for_each(copy_row);
    }
    Ok(())
}

fn allocate_frame(len: usize) -> CaptureResult<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| CaptureError::OutOfMemory("frame buffer"))?;
    buffer.resize(len, 0);
    Ok(buffer)
}

/// The two CPU-side frame slots.
///
/// `clean` receives every read-back of the composite surface and never has
/// a cursor drawn into it. `presented` is what callers see: the clean image
/// plus the cursor overlay. Keeping them apart lets a pointer-only change
/// be redrawn without another read-back.
#[derive(Debug)]
pub struct FrameBuffers {
    width: u32,
    height: u32,
    clean: Vec<u8>,
    presented: Vec<u8>,
}

impl FrameBuffers {
    pub fn new(width: u32, height: u32) -> CaptureResult<Self> {
        let len = frame_size(width, height)?;
        Ok(Self {
            width,
            height,
            clean: allocate_frame(len)?,
            presented: allocate_frame(len)?,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame_size(&self) -> usize {
        self.presented.len()
    }

    /// Replace the clean slot with a mapped surface of the given pitch.
    pub fn fill_from_surface(&mut self, src: &[u8], src_pitch: usize) -> CaptureResult<()> {
        copy_rows(src, src_pitch, &mut self.clean, self.width, self.height)
    }

    /// Rebuild the presented slot from the clean slot, overlaying `cursor`.
    pub fn present(&mut self, cursor: Option<&CursorState>) {
        self.presented.copy_from_slice(&self.clean);
        if let Some(cursor) = cursor {
            cursor.blend_into(&mut self.presented, self.width, self.height);
        }
    }

    pub fn presented(&self) -> &[u8] {
        &self.presented
    }
}

pub fn frame_size(width: u32, height: u32) -> CaptureResult<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(BYTES_PER_PIXEL))
        .ok_or(CaptureError::BufferOverflow)
}
