//! Capture geometry resolution.
//!
//! [`resolve_geometry`] maps a requested capture rectangle onto the set of
//! display outputs it overlaps. Each overlap becomes a [`RegionPlan`] whose
//! [`RegionBlit`] says where in the source output to read and where in the
//! composite image to write. Destination rectangles of all plans tile the
//! target rectangle exactly.

use std::fmt;

use crate::error::{CaptureError, CaptureResult};
use crate::source::CaptureSource;

/// Half-open rectangle in virtual desktop coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DesktopRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl DesktopRect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_origin_size(x: i32, y: i32, width: u32, height: u32) -> CaptureResult<Self> {
        let w = i32::try_from(width).map_err(|_| CaptureError::BufferOverflow)?;
        let h = i32::try_from(height).map_err(|_| CaptureError::BufferOverflow)?;
        let right = x.checked_add(w).ok_or(CaptureError::BufferOverflow)?;
        let bottom = y.checked_add(h).ok_or(CaptureError::BufferOverflow)?;
        Ok(Self::new(x, y, right, bottom))
    }

    pub fn width(&self) -> u32 {
        (i64::from(self.right) - i64::from(self.left)).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (i64::from(self.bottom) - i64::from(self.top)).max(0) as u32
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    pub fn contains_rect(&self, other: &DesktopRect) -> bool {
        other.left >= self.left
            && other.right <= self.right
            && other.top >= self.top
            && other.bottom <= self.bottom
    }

    /// Overlap of both rectangles, or `None` when either axis is disjoint.
    pub fn intersection(&self, other: &DesktopRect) -> Option<DesktopRect> {
        let overlap = DesktopRect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        (!overlap.is_empty()).then_some(overlap)
    }

    /// Smallest rectangle enclosing every input rectangle.
    pub fn bounding<'a>(rects: impl IntoIterator<Item = &'a DesktopRect>) -> Option<DesktopRect> {
        rects.into_iter().fold(None, |acc, rect| {
            Some(match acc {
                None => *rect,
                Some(bounds) => DesktopRect::new(
                    bounds.left.min(rect.left),
                    bounds.top.min(rect.top),
                    bounds.right.max(rect.right),
                    bounds.bottom.max(rect.bottom),
                ),
            })
        })
    }
}

impl fmt::Display for DesktopRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{},{},{})",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Which outputs a capture may draw from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaptureTarget {
    /// Every output of the virtual desktop. Offsets are desktop coordinates.
    #[default]
    WholeDesktop,

    /// One output, by its position in the source enumeration. Offsets are
    /// relative to that output's desktop origin.
    Output(usize),
}

/// Inputs to geometry resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeometryRequest {
    pub target: CaptureTarget,
    pub offset_x: i32,
    pub offset_y: i32,
    /// Explicit capture size. `None` sizes the capture to the output that
    /// contains the anchor point.
    pub size: Option<(u32, u32)>,
}

/// Source/destination rectangle pair describing one region's share of the
/// composite image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionBlit {
    pub src_x: u32,
    pub src_y: u32,
    pub dst_x: u32,
    pub dst_y: u32,
    pub width: u32,
    pub height: u32,
}

impl RegionBlit {
    /// Destination rectangle in composite coordinates.
    pub fn destination(&self) -> DesktopRect {
        DesktopRect::new(
            self.dst_x as i32,
            self.dst_y as i32,
            (self.dst_x + self.width) as i32,
            (self.dst_y + self.height) as i32,
        )
    }

    /// Offset that maps a point in source-output space to composite space.
    pub fn source_to_composite(&self) -> (i32, i32) {
        (
            self.dst_x as i32 - self.src_x as i32,
            self.dst_y as i32 - self.src_y as i32,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionPlan {
    pub source: CaptureSource,
    pub blit: RegionBlit,
}

/// Result of geometry resolution. Computed once at open, immutable after.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureGeometry {
    pub target: DesktopRect,
    /// Bounding box of every candidate output.
    pub desktop_extents: DesktopRect,
    pub regions: Vec<RegionPlan>,
}

impl CaptureGeometry {
    pub fn output_width(&self) -> u32 {
        self.target.width()
    }

    pub fn output_height(&self) -> u32 {
        self.target.height()
    }
}

pub fn resolve_geometry(
    sources: &[CaptureSource],
    request: &GeometryRequest,
) -> CaptureResult<CaptureGeometry> {
    if sources.is_empty() {
        return Err(CaptureError::Geometry(
            "no output sources available".to_string(),
        ));
    }
    if let Some((width, height)) = request.size
        && (width == 0 || height == 0)
    {
        return Err(CaptureError::InvalidConfig(format!(
            "capture size must be non-zero, got {width}x{height}"
        )));
    }

    let (candidates, anchor_x, anchor_y) = match request.target {
        CaptureTarget::WholeDesktop => (sources.to_vec(), request.offset_x, request.offset_y),
        CaptureTarget::Output(index) => {
            let source = sources.get(index).ok_or_else(|| {
                CaptureError::Geometry(format!(
                    "output index {index} not found ({} outputs available)",
                    sources.len()
                ))
            })?;
            let origin = source.rect();
            let anchor_x = origin
                .left
                .checked_add(request.offset_x)
                .ok_or(CaptureError::BufferOverflow)?;
            let anchor_y = origin
                .top
                .checked_add(request.offset_y)
                .ok_or(CaptureError::BufferOverflow)?;
            (vec![source.clone()], anchor_x, anchor_y)
        }
    };

    let rects: Vec<DesktopRect> = candidates.iter().map(CaptureSource::rect).collect();
    let extents = DesktopRect::bounding(&rects).unwrap_or_default();

    let initial = candidates
        .iter()
        .find(|source| source.rect().contains_point(anchor_x, anchor_y))
        .ok_or_else(|| {
            CaptureError::Geometry(format!(
                "initial monitor not found: anchor ({anchor_x},{anchor_y}) is outside available space {extents}"
            ))
        })?;

    let (width, height) = request
        .size
        .unwrap_or((initial.rect().width(), initial.rect().height()));
    let target = DesktopRect::from_origin_size(anchor_x, anchor_y, width, height)?;

    if !extents.contains_rect(&target) {
        return Err(CaptureError::Geometry(format!(
            "target rect {target} is outside available space {extents}"
        )));
    }

    let mut regions = Vec::with_capacity(candidates.len());
    for source in &candidates {
        let bounds = source.rect();
        let Some(overlap) = target.intersection(&bounds) else {
            continue;
        };
        regions.push(RegionPlan {
            source: source.clone(),
            blit: RegionBlit {
                src_x: (overlap.left - bounds.left) as u32,
                src_y: (overlap.top - bounds.top) as u32,
                dst_x: (overlap.left - target.left) as u32,
                dst_y: (overlap.top - target.top) as u32,
                width: overlap.width(),
                height: overlap.height(),
            },
        });
    }

    // The bounding box can contain holes (L-shaped layouts); every target
    // pixel must come from exactly one output.
    let covered = regions
        .iter()
        .fold(0u64, |area, plan| area + plan.blit.destination().area());
    if covered != target.area() {
        return Err(CaptureError::Geometry(format!(
            "target rect {target} crosses desktop area not covered by any output (extents {extents})"
        )));
    }

    Ok(CaptureGeometry {
        target,
        desktop_extents: extents,
        regions,
    })
}
