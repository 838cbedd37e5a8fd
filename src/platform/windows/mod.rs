pub(crate) mod composite;
pub(crate) mod d3d11;
pub(crate) mod duplication;
pub(crate) mod monitor;

use crate::backend::{CaptureBackend, CompositeDevice};
use crate::error::{CaptureError, CaptureResult};
use crate::source::CaptureSource;

/// DXGI desktop duplication backend.
pub(crate) struct WindowsBackend;

impl WindowsBackend {
    pub(crate) fn new() -> Self {
        Self
    }
}

impl CaptureBackend for WindowsBackend {
    fn enumerate_sources(&self) -> CaptureResult<Vec<CaptureSource>> {
        Ok(monitor::enumerate_outputs()?
            .into_iter()
            .map(|output| output.source)
            .collect())
    }

    fn create_composite(
        &self,
        sources: &[CaptureSource],
        width: u32,
        height: u32,
    ) -> CaptureResult<Box<dyn CompositeDevice>> {
        // Re-enumerate so the native handles match the current layout.
        let outputs: Vec<_> = monitor::enumerate_outputs()?
            .into_iter()
            .filter(|output| sources.iter().any(|source| *source == output.source))
            .collect();
        if outputs.len() != sources.len() {
            return Err(CaptureError::resource(
                "failed to resolve capture outputs",
                anyhow::anyhow!(
                    "{} of {} outputs changed since enumeration",
                    sources.len() - outputs.len(),
                    sources.len()
                ),
            ));
        }
        Ok(Box::new(composite::DxgiComposite::new(outputs, width, height)?))
    }
}
