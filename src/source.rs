use std::fmt;

use crate::geometry::DesktopRect;

/// Output rotation as reported by the OS. Forwarded for listing only;
/// captured pixels are never rotated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SourceRotation {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
    Unspecified,
}

/// Immutable snapshot of one display output taken at resolution time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureSource {
    adapter_index: u32,
    output_index: u32,
    name: String,
    rect: DesktopRect,
    rotation: SourceRotation,
    is_primary: bool,
}

impl CaptureSource {
    pub fn from_parts(
        adapter_index: u32,
        output_index: u32,
        name: impl Into<String>,
        rect: DesktopRect,
        rotation: SourceRotation,
        is_primary: bool,
    ) -> Self {
        Self {
            adapter_index,
            output_index,
            name: name.into(),
            rect,
            rotation,
            is_primary,
        }
    }

    pub fn adapter_index(&self) -> u32 {
        self.adapter_index
    }

    pub fn output_index(&self) -> u32 {
        self.output_index
    }

    /// OS device name, e.g. `\\.\DISPLAY1`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Desktop-space rectangle of the output.
    pub fn rect(&self) -> DesktopRect {
        self.rect
    }

    pub fn rotation(&self) -> SourceRotation {
        self.rotation
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    /// Human-readable identifier used by device listings.
    pub fn describe(&self) -> String {
        format!(
            "adapter {} / output {} ({})",
            self.adapter_index, self.output_index, self.name
        )
    }
}

/// One entry of a source listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// `adapter N / output M (\\.\DISPLAYk)`.
    pub id: String,
    pub rect: DesktopRect,
    pub is_primary: bool,
    pub rotation: SourceRotation,
}

impl From<&CaptureSource> for SourceDescriptor {
    fn from(source: &CaptureSource) -> Self {
        Self {
            id: source.describe(),
            rect: source.rect,
            is_primary: source.is_primary,
            rotation: source.rotation,
        }
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
