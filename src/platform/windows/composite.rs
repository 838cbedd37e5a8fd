use anyhow::Context;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_MAP_READ, D3D11_MAPPED_SUBRESOURCE, ID3D11Device, ID3D11DeviceContext, ID3D11Resource,
};
use windows::core::Interface;

use crate::backend::{CompositeDevice, OutputDuplication};
use crate::error::{CaptureError, CaptureResult};
use crate::geometry::RegionBlit;
use crate::source::CaptureSource;
use crate::surface::BYTES_PER_PIXEL;

use super::d3d11;
use super::duplication::DxgiDuplication;
use super::monitor::DxgiOutput;

/// Device, immediate context and the staging texture all regions copy
/// into. Fields drop in declaration order: surface, context, device.
pub(crate) struct DxgiComposite {
    surface: ID3D11Resource,
    context: ID3D11DeviceContext,
    device: ID3D11Device,
    outputs: Vec<DxgiOutput>,
    width: u32,
    height: u32,
}

impl DxgiComposite {
    pub(crate) fn new(outputs: Vec<DxgiOutput>, width: u32, height: u32) -> CaptureResult<Self> {
        let adapter = outputs
            .first()
            .map(|output| output.adapter.clone())
            .ok_or_else(|| {
                CaptureError::resource(
                    "cannot create a composite surface",
                    anyhow::anyhow!("no outputs to capture"),
                )
            })?;

        let (device, context) = d3d11::create_d3d11_device_for_adapter(&adapter)
            .map_err(|error| CaptureError::resource("failed to create D3D11 device", error))?;
        let surface = d3d11::create_composite_texture(&device, width, height)
            .and_then(|texture| {
                texture
                    .cast::<ID3D11Resource>()
                    .context("failed to cast composite texture to ID3D11Resource")
            })
            .map_err(|error| CaptureError::resource("failed to create composite surface", error))?;

        Ok(Self {
            surface,
            context,
            device,
            outputs,
            width,
            height,
        })
    }
}

impl CompositeDevice for DxgiComposite {
    fn open_duplication(
        &mut self,
        source: &CaptureSource,
        blit: RegionBlit,
    ) -> CaptureResult<Box<dyn OutputDuplication>> {
        let output = self
            .outputs
            .iter()
            .find(|candidate| {
                candidate.source.adapter_index() == source.adapter_index()
                    && candidate.source.output_index() == source.output_index()
            })
            .ok_or_else(|| {
                CaptureError::resource(
                    format!("failed to duplicate {}", source.describe()),
                    anyhow::anyhow!("output is not attached to this device"),
                )
            })?;
        let duplication = DxgiDuplication::new(
            source,
            &output.output,
            &self.device,
            self.context.clone(),
            self.surface.clone(),
            blit,
        )?;
        Ok(Box::new(duplication))
    }

    fn read_back(
        &mut self,
        sink: &mut dyn FnMut(&[u8], usize) -> CaptureResult<()>,
    ) -> CaptureResult<()> {
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.context
                .Map(&self.surface, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
        }
        .context("failed to map composite surface")
        .map_err(CaptureError::Platform)?;

        let pitch = mapped.RowPitch as usize;
        let row_bytes = self.width as usize * BYTES_PER_PIXEL;
        let len = pitch * (self.height as usize).saturating_sub(1) + row_bytes;
        let result = if mapped.pData.is_null() || pitch < row_bytes {
            Err(CaptureError::Platform(anyhow::anyhow!(
                "composite surface mapped with row pitch {pitch} for {row_bytes}-byte rows"
            )))
        } else {
            let bytes = unsafe { std::slice::from_raw_parts(mapped.pData.cast::<u8>(), len) };
            sink(bytes, pitch)
        };

        unsafe {
            self.context.Unmap(&self.surface, 0);
        }
        result
    }
}
