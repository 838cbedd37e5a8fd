use std::sync::Arc;

use crate::backend::CaptureBackend;
#[cfg(not(target_os = "windows"))]
use crate::backend::CompositeDevice;
#[cfg(not(target_os = "windows"))]
use crate::error::CaptureError;
use crate::error::CaptureResult;
#[cfg(not(target_os = "windows"))]
use crate::source::CaptureSource;

#[cfg(target_os = "windows")]
pub(crate) mod windows;

#[cfg(not(target_os = "windows"))]
fn unsupported_error() -> CaptureError {
    CaptureError::Platform(anyhow::anyhow!(
        "desktop duplication is only supported on Windows"
    ))
}

#[cfg(not(target_os = "windows"))]
struct UnsupportedBackend;

#[cfg(not(target_os = "windows"))]
impl CaptureBackend for UnsupportedBackend {
    fn enumerate_sources(&self) -> CaptureResult<Vec<CaptureSource>> {
        Err(unsupported_error())
    }

    fn create_composite(
        &self,
        _sources: &[CaptureSource],
        _width: u32,
        _height: u32,
    ) -> CaptureResult<Box<dyn CompositeDevice>> {
        Err(unsupported_error())
    }
}

#[cfg(target_os = "windows")]
pub(crate) fn build_backend() -> CaptureResult<Arc<dyn CaptureBackend>> {
    Ok(Arc::new(windows::WindowsBackend::new()))
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn build_backend() -> CaptureResult<Arc<dyn CaptureBackend>> {
    Ok(Arc::new(UnsupportedBackend))
}
