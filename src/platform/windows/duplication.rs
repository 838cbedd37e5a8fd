use anyhow::Context;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BOX, ID3D11Device, ID3D11DeviceContext, ID3D11Resource,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO,
    DXGI_OUTDUPL_MOVE_RECT, DXGI_OUTDUPL_POINTER_SHAPE_INFO, DXGI_OUTDUPL_POINTER_SHAPE_TYPE_COLOR,
    DXGI_OUTDUPL_POINTER_SHAPE_TYPE_MASKED_COLOR, IDXGIOutput, IDXGIOutput1,
    IDXGIOutputDuplication, IDXGIResource,
};
use windows::core::Interface;

use crate::backend::{
    AcquireOutcome, DuplicationFrameInfo, MetadataRecords, OutputDuplication, PointerPosition,
    PointerShapeInfo, PointerShapeKind,
};
use crate::error::{CaptureError, CaptureResult};
use crate::geometry::RegionBlit;
use crate::source::CaptureSource;

fn create_duplication(
    output: &IDXGIOutput,
    device: &ID3D11Device,
) -> anyhow::Result<IDXGIOutputDuplication> {
    let output1: IDXGIOutput1 = output.cast().context("failed to query IDXGIOutput1")?;
    unsafe { output1.DuplicateOutput(device) }.context("DuplicateOutput failed")
}

fn frame_info_from_dxgi(info: &DXGI_OUTDUPL_FRAME_INFO) -> DuplicationFrameInfo {
    DuplicationFrameInfo {
        accumulated_frames: info.AccumulatedFrames,
        total_metadata_size: info.TotalMetadataBufferSize,
        last_mouse_update: info.LastMouseUpdateTime,
        pointer: PointerPosition {
            x: info.PointerPosition.Position.x,
            y: info.PointerPosition.Position.y,
            visible: info.PointerPosition.Visible.as_bool(),
        },
        pointer_shape_size: info.PointerShapeBufferSize,
    }
}

fn shape_kind_from_dxgi(kind: u32) -> PointerShapeKind {
    match kind {
        k if k == DXGI_OUTDUPL_POINTER_SHAPE_TYPE_COLOR.0 as u32 => PointerShapeKind::Color,
        k if k == DXGI_OUTDUPL_POINTER_SHAPE_TYPE_MASKED_COLOR.0 as u32 => {
            PointerShapeKind::MaskedColor
        }
        _ => PointerShapeKind::Monochrome,
    }
}

/// Desktop duplication of one output, copying its region of each frame
/// into the shared composite texture.
pub(crate) struct DxgiDuplication {
    /// Desktop image of the frame currently held between acquire and
    /// release.
    held: Option<ID3D11Resource>,
    duplication: IDXGIOutputDuplication,
    context: ID3D11DeviceContext,
    composite: ID3D11Resource,
    blit: RegionBlit,
    output_name: String,
}

impl DxgiDuplication {
    pub(crate) fn new(
        source: &CaptureSource,
        output: &IDXGIOutput,
        device: &ID3D11Device,
        context: ID3D11DeviceContext,
        composite: ID3D11Resource,
        blit: RegionBlit,
    ) -> CaptureResult<Self> {
        let duplication = create_duplication(output, device)
            .map_err(|error| {
                CaptureError::resource(format!("failed to duplicate {}", source.describe()), error)
            })?;
        Ok(Self {
            held: None,
            duplication,
            context,
            composite,
            blit,
            output_name: source.name().to_string(),
        })
    }

    fn platform_error(&self, error: windows::core::Error, what: &str) -> CaptureError {
        CaptureError::Platform(
            anyhow::Error::from(error).context(format!("{what} failed on {}", self.output_name)),
        )
    }
}

impl OutputDuplication for DxgiDuplication {
    fn acquire_next_frame(&mut self, timeout_ms: u32) -> CaptureResult<AcquireOutcome> {
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        let acquired =
            unsafe { self.duplication.AcquireNextFrame(timeout_ms, &mut info, &mut resource) };
        if let Err(error) = acquired {
            if error.code() == DXGI_ERROR_WAIT_TIMEOUT {
                return Ok(AcquireOutcome::Timeout);
            }
            if error.code() == DXGI_ERROR_ACCESS_LOST {
                return Ok(AcquireOutcome::AccessLost);
            }
            return Err(self.platform_error(error, "AcquireNextFrame"));
        }

        let texture = match resource.map(|resource| resource.cast::<ID3D11Resource>()) {
            Some(Ok(texture)) => texture,
            Some(Err(error)) => {
                unsafe { self.duplication.ReleaseFrame() }.ok();
                return Err(self.platform_error(error, "casting the desktop image"));
            }
            None => {
                unsafe { self.duplication.ReleaseFrame() }.ok();
                return Ok(AcquireOutcome::Timeout);
            }
        };
        self.held = Some(texture);
        Ok(AcquireOutcome::Acquired(frame_info_from_dxgi(&info)))
    }

    fn move_rects(&mut self, buffer: &mut [u8]) -> CaptureResult<MetadataRecords> {
        let mut used = 0u32;
        unsafe {
            self.duplication.GetFrameMoveRects(
                buffer.len() as u32,
                buffer.as_mut_ptr().cast::<DXGI_OUTDUPL_MOVE_RECT>(),
                &mut used,
            )
        }
        .map_err(|error| self.platform_error(error, "GetFrameMoveRects"))?;
        let bytes = used as usize;
        Ok(MetadataRecords {
            count: bytes / size_of::<DXGI_OUTDUPL_MOVE_RECT>(),
            bytes,
        })
    }

    fn dirty_rects(&mut self, buffer: &mut [u8]) -> CaptureResult<MetadataRecords> {
        let mut used = 0u32;
        unsafe {
            self.duplication.GetFrameDirtyRects(
                buffer.len() as u32,
                buffer.as_mut_ptr().cast::<RECT>(),
                &mut used,
            )
        }
        .map_err(|error| self.platform_error(error, "GetFrameDirtyRects"))?;
        let bytes = used as usize;
        Ok(MetadataRecords {
            count: bytes / size_of::<RECT>(),
            bytes,
        })
    }

    fn pointer_shape(&mut self, buffer: &mut [u8]) -> CaptureResult<PointerShapeInfo> {
        let mut required = 0u32;
        let mut info = DXGI_OUTDUPL_POINTER_SHAPE_INFO::default();
        unsafe {
            self.duplication.GetFramePointerShape(
                buffer.len() as u32,
                buffer.as_mut_ptr().cast(),
                &mut required,
                &mut info,
            )
        }
        .map_err(|error| self.platform_error(error, "GetFramePointerShape"))?;
        Ok(PointerShapeInfo {
            kind: shape_kind_from_dxgi(info.Type),
            width: info.Width,
            height: info.Height,
            pitch: info.Pitch,
            hot_spot_x: info.HotSpot.x,
            hot_spot_y: info.HotSpot.y,
        })
    }

    fn copy_to_composite(&mut self) -> CaptureResult<()> {
        let source = self.held.as_ref().ok_or_else(|| {
            CaptureError::Platform(anyhow::anyhow!(
                "no frame held on {} while copying",
                self.output_name
            ))
        })?;
        let blit = self.blit;
        let source_box = D3D11_BOX {
            left: blit.src_x,
            top: blit.src_y,
            front: 0,
            right: blit.src_x + blit.width,
            bottom: blit.src_y + blit.height,
            back: 1,
        };
        unsafe {
            self.context.CopySubresourceRegion(
                &self.composite,
                0,
                blit.dst_x,
                blit.dst_y,
                0,
                source,
                0,
                Some(&source_box),
            );
        }
        Ok(())
    }

    fn release_frame(&mut self) -> CaptureResult<()> {
        self.held = None;
        unsafe { self.duplication.ReleaseFrame() }
            .map_err(|error| self.platform_error(error, "ReleaseFrame"))
    }
}
