use anyhow::Context;
use windows::Win32::Foundation::POINT;
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_MODE_ROTATION, DXGI_MODE_ROTATION_IDENTITY, DXGI_MODE_ROTATION_ROTATE90,
    DXGI_MODE_ROTATION_ROTATE180, DXGI_MODE_ROTATION_ROTATE270,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, DXGI_ERROR_NOT_FOUND, IDXGIAdapter, IDXGIFactory1, IDXGIOutput,
};
use windows::Win32::Graphics::Gdi::{HMONITOR, MONITOR_DEFAULTTOPRIMARY, MonitorFromPoint};
use windows::core::Interface;

use crate::error::{CaptureError, CaptureResult};
use crate::geometry::DesktopRect;
use crate::source::{CaptureSource, SourceRotation};

/// An enumerated output together with the native handles needed to
/// duplicate it.
#[derive(Clone)]
pub(crate) struct DxgiOutput {
    pub source: CaptureSource,
    pub adapter: IDXGIAdapter,
    pub output: IDXGIOutput,
}

fn primary_hmonitor() -> HMONITOR {
    unsafe { MonitorFromPoint(POINT { x: 0, y: 0 }, MONITOR_DEFAULTTOPRIMARY) }
}

fn utf16z_to_string(input: &[u16]) -> String {
    let len = input.iter().position(|&ch| ch == 0).unwrap_or(input.len());
    String::from_utf16_lossy(&input[..len])
}

fn rotation_from_dxgi(rotation: DXGI_MODE_ROTATION) -> SourceRotation {
    match rotation {
        DXGI_MODE_ROTATION_IDENTITY => SourceRotation::Identity,
        DXGI_MODE_ROTATION_ROTATE90 => SourceRotation::Rotate90,
        DXGI_MODE_ROTATION_ROTATE180 => SourceRotation::Rotate180,
        DXGI_MODE_ROTATION_ROTATE270 => SourceRotation::Rotate270,
        _ => SourceRotation::Unspecified,
    }
}

/// Walk every adapter and every desktop-attached output, in DXGI order.
pub(crate) fn enumerate_outputs() -> CaptureResult<Vec<DxgiOutput>> {
    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
        .context("CreateDXGIFactory1 failed")
        .map_err(CaptureError::Platform)?;
    let primary = primary_hmonitor();

    let mut outputs = Vec::new();
    let mut adapter_idx = 0u32;

    loop {
        let adapter1 = match unsafe { factory.EnumAdapters1(adapter_idx) } {
            Ok(a) => a,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => {
                return Err(CaptureError::Platform(
                    anyhow::Error::from(e).context(format!("EnumAdapters1({adapter_idx}) failed")),
                ));
            }
        };
        let adapter: IDXGIAdapter = adapter1
            .cast()
            .context("failed to cast IDXGIAdapter1 to IDXGIAdapter")
            .map_err(CaptureError::Platform)?;

        let mut output_idx = 0u32;
        loop {
            let output = match unsafe { adapter.EnumOutputs(output_idx) } {
                Ok(o) => o,
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => {
                    return Err(CaptureError::Platform(anyhow::Error::from(e).context(
                        format!("EnumOutputs({output_idx}) on adapter {adapter_idx} failed"),
                    )));
                }
            };

            let desc = unsafe { output.GetDesc() }
                .context("IDXGIOutput::GetDesc failed")
                .map_err(CaptureError::Platform)?;

            if desc.AttachedToDesktop.as_bool() {
                let coords = desc.DesktopCoordinates;
                let source = CaptureSource::from_parts(
                    adapter_idx,
                    output_idx,
                    utf16z_to_string(&desc.DeviceName),
                    DesktopRect::new(coords.left, coords.top, coords.right, coords.bottom),
                    rotation_from_dxgi(desc.Rotation),
                    desc.Monitor == primary,
                );
                log::trace!("found {} at {}", source.describe(), source.rect());
                outputs.push(DxgiOutput {
                    source,
                    adapter: adapter.clone(),
                    output,
                });
            }

            output_idx += 1;
        }

        adapter_idx += 1;
    }

    Ok(outputs)
}
