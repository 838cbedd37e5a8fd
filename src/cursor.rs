//! Pointer tracking and software cursor compositing.
//!
//! The tracker folds pointer updates from every region's change-stream into
//! one [`CursorState`] expressed in composite coordinates. The compositor
//! blends that state into a CPU-side BGRA frame.

use crate::backend::{DuplicationFrameInfo, OutputDuplication, PointerShapeInfo, PointerShapeKind};
use crate::error::{CaptureResult, try_grow};

#[derive(Debug, Default)]
pub struct CursorState {
    x: i32,
    y: i32,
    visible: bool,
    shape: PointerShapeInfo,
    /// Grows to the largest shape seen; never shrinks.
    shape_buffer: Vec<u8>,
    last_update: i64,
}

impl CursorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn shape(&self) -> PointerShapeInfo {
        self.shape
    }

    pub fn last_update(&self) -> i64 {
        self.last_update
    }

    pub fn has_shape(&self) -> bool {
        self.shape.width > 0 && self.shape.height > 0
    }

    /// Apply the pointer part of a freshly acquired frame.
    ///
    /// `to_composite` is the `dst - src` offset of the reporting region.
    /// Returns `true` when position, visibility or shape changed.
    pub(crate) fn observe(
        &mut self,
        info: &DuplicationFrameInfo,
        to_composite: (i32, i32),
        duplication: &mut dyn OutputDuplication,
    ) -> CaptureResult<bool> {
        let mut changed = false;

        if info.last_mouse_update != 0 && info.last_mouse_update > self.last_update {
            self.last_update = info.last_mouse_update;
            let pointer = info.pointer;
            let x = pointer.x.saturating_add(to_composite.0);
            let y = pointer.y.saturating_add(to_composite.1);
            if pointer.visible != self.visible || (pointer.visible && (x, y) != (self.x, self.y)) {
                changed = true;
            }
            self.visible = pointer.visible;
            if pointer.visible {
                self.x = x;
                self.y = y;
            }
        }

        if info.pointer_shape_size > 0 {
            let required = info.pointer_shape_size as usize;
            try_grow(&mut self.shape_buffer, required, "cursor shape buffer")?;
            self.shape = duplication.pointer_shape(&mut self.shape_buffer[..required])?;
            changed = true;
        }

        Ok(changed)
    }

    /// Blend the cursor into a tightly packed BGRA frame.
    pub fn blend_into(&self, frame: &mut [u8], width: u32, height: u32) {
        if !self.visible || !self.has_shape() {
            return;
        }
        let target = FrameView {
            bytes: frame,
            width,
            height,
        };
        match self.shape.kind {
            PointerShapeKind::Monochrome => {
                blend_monochrome(target, &self.shape_buffer, self.shape, self.x, self.y)
            }
            PointerShapeKind::Color => {
                blend_color(target, &self.shape_buffer, self.shape, self.x, self.y)
            }
            PointerShapeKind::MaskedColor => {
                blend_masked_color(target, &self.shape_buffer, self.shape, self.x, self.y)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_for_test(
        &mut self,
        x: i32,
        y: i32,
        shape: PointerShapeInfo,
        shape_bytes: &[u8],
    ) {
        self.x = x;
        self.y = y;
        self.visible = true;
        self.shape = shape;
        self.shape_buffer = shape_bytes.to_vec();
    }
}

struct FrameView<'a> {
    bytes: &'a mut [u8],
    width: u32,
    height: u32,
}

impl FrameView<'_> {
    /// BGRA pixel at composite coordinates, or `None` when off-surface.
    fn pixel(&mut self, x: i64, y: i64) -> Option<&mut [u8]> {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        self.bytes.get_mut(offset..offset + 4)
    }
}

fn mask_bit(shape: &[u8], pitch: usize, row: usize, col: usize) -> bool {
    shape
        .get(row * pitch + col / 8)
        .is_some_and(|byte| byte & (0x80 >> (col % 8)) != 0)
}

fn invert_rgb(pixel: &mut [u8]) {
    pixel[0] ^= 0xFF;
    pixel[1] ^= 0xFF;
    pixel[2] ^= 0xFF;
    pixel[3] = 0xFF;
}

fn blend_monochrome(
    mut target: FrameView<'_>,
    shape: &[u8],
    info: PointerShapeInfo,
    x: i32,
    y: i32,
) {
    let rows = (info.height / 2) as usize;
    let pitch = info.pitch as usize;
    for row in 0..rows {
        for col in 0..info.width as usize {
            let and = mask_bit(shape, pitch, row, col);
            let xor = mask_bit(shape, pitch, row + rows, col);
            let Some(pixel) = target.pixel(i64::from(x) + col as i64, i64::from(y) + row as i64)
            else {
                continue;
            };
            match (and, xor) {
                (true, false) => {}
                (_, true) => invert_rgb(pixel),
                (false, false) => pixel.copy_from_slice(&[0, 0, 0, 0xFF]),
            }
        }
    }
}

fn shape_pixel(shape: &[u8], pitch: usize, row: usize, col: usize) -> Option<&[u8]> {
    let offset = row * pitch + col * 4;
    shape.get(offset..offset + 4)
}

fn blend_channel(src: u8, dst: u8, alpha: u8) -> u8 {
    let a = u32::from(alpha);
    ((u32::from(src) * a + u32::from(dst) * (255 - a) + 127) / 255) as u8
}

fn blend_color(mut target: FrameView<'_>, shape: &[u8], info: PointerShapeInfo, x: i32, y: i32) {
    let pitch = info.pitch as usize;
    for row in 0..info.height as usize {
        for col in 0..info.width as usize {
            let Some(src) = shape_pixel(shape, pitch, row, col) else {
                continue;
            };
            let Some(dst) = target.pixel(i64::from(x) + col as i64, i64::from(y) + row as i64)
            else {
                continue;
            };
            let alpha = src[3];
            for channel in 0..3 {
                dst[channel] = blend_channel(src[channel], dst[channel], alpha);
            }
            dst[3] = blend_channel(0xFF, dst[3], alpha);
        }
    }
}

fn blend_masked_color(
    mut target: FrameView<'_>,
    shape: &[u8],
    info: PointerShapeInfo,
    x: i32,
    y: i32,
) {
    let pitch = info.pitch as usize;
    for row in 0..info.height as usize {
        for col in 0..info.width as usize {
            let Some(src) = shape_pixel(shape, pitch, row, col) else {
                continue;
            };
            let Some(dst) = target.pixel(i64::from(x) + col as i64, i64::from(y) + row as i64)
            else {
                continue;
            };
            if dst[3] == 0xFF {
                dst[0] ^= src[0];
                dst[1] ^= src[1];
                dst[2] ^= src[2];
            } else {
                dst[..3].copy_from_slice(&src[..3]);
                dst[3] = 0xFF;
            }
        }
    }
}
