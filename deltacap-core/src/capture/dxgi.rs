//! DXGI Desktop Duplication frame source for Windows.
//!
//! Uses the Direct3D 11 Desktop Duplication API to obtain GPU-backed
//! desktop frames and copy them into system memory through a
//! CPU-readable staging texture.
//!
//! # Platform
//!
//! This module is **Windows-only**. On other platforms the type is still
//! defined but [`FrameSource::open`] reports
//! [`SourceError::Unavailable`].

use std::time::Duration;

use crate::capture::source::{Acquired, FrameSource};
use crate::capture::types::FrameDescriptor;
use crate::error::SourceError;

/// Desktop Duplication source for one monitor.
///
/// Per acquisition:
///
/// 1. `AcquireNextFrame` (blocks up to the timeout).
/// 2. On copy: `CopyResource` into the staging texture, `ReleaseFrame`,
///    `Map`, row-by-row memcpy honouring `RowPitch`, `Unmap`.
///
/// A frame that was acquired but never copied is released before the
/// next `AcquireNextFrame`, and on `close`.
///
/// # Safety
///
/// All unsafe FFI calls are confined to this struct.
pub struct DxgiSource {
    /// Output index (0 = primary monitor).
    monitor_index: u32,
    #[cfg(target_os = "windows")]
    state: Option<platform::DxgiState>,
}

/// Handle to an acquired desktop texture.
pub struct DxgiFrame {
    #[cfg(target_os = "windows")]
    texture: windows::Win32::Graphics::Direct3D11::ID3D11Texture2D,
}

impl DxgiSource {
    /// Create a source for monitor `monitor_index`. No GPU resources are
    /// created until [`FrameSource::open`].
    pub fn new(monitor_index: u32) -> Self {
        Self {
            monitor_index,
            #[cfg(target_os = "windows")]
            state: None,
        }
    }

    pub fn monitor_index(&self) -> u32 {
        self.monitor_index
    }
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use tracing::{debug, warn};
    use windows::{
        Win32::Graphics::{
            Direct3D::D3D_DRIVER_TYPE_HARDWARE,
            Direct3D11::*,
            Dxgi::{Common::*, *},
        },
        core::Interface,
    };

    pub(super) struct DxgiState {
        _device: ID3D11Device,
        context: ID3D11DeviceContext,
        duplication: IDXGIOutputDuplication,
        staging: ID3D11Texture2D,
        /// Desktop size reported by the duplication.
        output_width: u32,
        output_height: u32,
        /// Size the session asked for; copies are clipped to both.
        target: FrameDescriptor,
        /// A frame is acquired and must be released before the next one.
        holding_frame: bool,
    }

    fn failed(what: &str, e: windows::core::Error) -> SourceError {
        SourceError::Failed(format!("{what} failed: {e}"))
    }

    impl DxgiState {
        pub(super) unsafe fn create(
            monitor_index: u32,
            target: FrameDescriptor,
        ) -> Result<Self, SourceError> {
            // 1. Create D3D11 device + immediate context.
            let mut device = None;
            let mut context = None;
            unsafe {
                D3D11CreateDevice(
                    None,
                    D3D_DRIVER_TYPE_HARDWARE,
                    None,
                    D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                    None,
                    D3D11_SDK_VERSION,
                    Some(&mut device),
                    None,
                    Some(&mut context),
                )
                .map_err(|e| SourceError::Unavailable(format!("D3D11CreateDevice failed: {e}")))?;
            }
            let device: ID3D11Device =
                device.ok_or_else(|| SourceError::Unavailable("D3D11 device is None".into()))?;
            let context: ID3D11DeviceContext =
                context.ok_or_else(|| SourceError::Unavailable("D3D11 context is None".into()))?;

            // 2. Device → Adapter → Output → duplication.
            let dxgi_device: IDXGIDevice =
                device.cast().map_err(|e| failed("cast to IDXGIDevice", e))?;
            let adapter = unsafe { dxgi_device.GetAdapter() }.map_err(|e| failed("GetAdapter", e))?;
            let output: IDXGIOutput = unsafe { adapter.EnumOutputs(monitor_index) }.map_err(|e| {
                SourceError::Unavailable(format!("EnumOutputs({monitor_index}) failed: {e}"))
            })?;
            let output1: IDXGIOutput1 =
                output.cast().map_err(|e| failed("cast to IDXGIOutput1", e))?;
            let duplication = unsafe { output1.DuplicateOutput(&device) }
                .map_err(|e| SourceError::Unavailable(format!("DuplicateOutput failed: {e}")))?;

            let dup_desc = unsafe { duplication.GetDesc() };
            let output_width = dup_desc.ModeDesc.Width;
            let output_height = dup_desc.ModeDesc.Height;

            // 3. CPU-readable staging texture matching the desktop.
            let staging_desc = D3D11_TEXTURE2D_DESC {
                Width: output_width,
                Height: output_height,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: 0,
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: 0,
            };
            let mut staging = None;
            unsafe { device.CreateTexture2D(&staging_desc, None, Some(&mut staging)) }
                .map_err(|e| failed("CreateTexture2D (staging)", e))?;
            let staging =
                staging.ok_or_else(|| SourceError::Failed("staging texture is None".into()))?;

            if output_width != target.width || output_height != target.height {
                warn!(
                    output_width,
                    output_height,
                    width = target.width,
                    height = target.height,
                    "desktop size differs from session size; frames will be clipped"
                );
            }

            Ok(Self {
                _device: device,
                context,
                duplication,
                staging,
                output_width,
                output_height,
                target,
                holding_frame: false,
            })
        }

        pub(super) fn release_frame(&mut self) {
            if self.holding_frame {
                let _ = unsafe { self.duplication.ReleaseFrame() };
                self.holding_frame = false;
            }
        }

        pub(super) unsafe fn acquire(
            &mut self,
            timeout: Duration,
        ) -> Result<Acquired<DxgiFrame>, SourceError> {
            self.release_frame();

            let timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
            let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource = None;

            match unsafe {
                self.duplication
                    .AcquireNextFrame(timeout_ms, &mut frame_info, &mut resource)
            } {
                Ok(()) => {}
                Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(Acquired::Unchanged),
                Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => return Err(SourceError::AccessLost),
                Err(e) => return Err(failed("AcquireNextFrame", e)),
            }
            self.holding_frame = true;

            // Pointer-only updates carry no new desktop image.
            if frame_info.LastPresentTime == 0 {
                self.release_frame();
                return Ok(Acquired::Unchanged);
            }

            let resource = match resource {
                Some(r) => r,
                None => {
                    self.release_frame();
                    return Err(SourceError::Failed("acquired resource is None".into()));
                }
            };
            let texture: ID3D11Texture2D = resource.cast().map_err(|e| {
                self.release_frame();
                failed("cast to ID3D11Texture2D", e)
            })?;

            Ok(Acquired::Changed(DxgiFrame { texture }))
        }

        pub(super) unsafe fn copy(
            &mut self,
            frame: DxgiFrame,
            dest: &mut [u8],
        ) -> Result<(), SourceError> {
            if dest.len() != self.target.frame_size() {
                self.release_frame();
                return Err(SourceError::Failed(format!(
                    "destination is {} bytes, expected {}",
                    dest.len(),
                    self.target.frame_size()
                )));
            }

            // GPU texture → staging texture, then give the frame back.
            unsafe { self.context.CopyResource(&self.staging, &frame.texture) };
            drop(frame);
            self.release_frame();

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe {
                self.context
                    .Map(&self.staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
            }
            .map_err(|e| failed("Map", e))?;

            let pitch = mapped.RowPitch as usize;
            let rows = self.output_height.min(self.target.height) as usize;
            let row_bytes = self.output_width.min(self.target.width) as usize * 4;
            let dest_row = self.target.row_bytes();
            let src = unsafe {
                std::slice::from_raw_parts(mapped.pData as *const u8, pitch * self.output_height as usize)
            };
            for y in 0..rows {
                dest[y * dest_row..y * dest_row + row_bytes]
                    .copy_from_slice(&src[y * pitch..y * pitch + row_bytes]);
            }

            unsafe { self.context.Unmap(&self.staging, 0) };
            Ok(())
        }
    }

    // SAFETY: the device is free-threaded, and the immediate context and
    // duplication are only touched by whichever thread currently owns the
    // source; the capture session serialises access behind a mutex.
    unsafe impl Send for DxgiState {}
    // SAFETY: a texture handle is only used by the thread that owns the
    // source it came from.
    unsafe impl Send for DxgiFrame {}

    impl Drop for DxgiState {
        fn drop(&mut self) {
            self.release_frame();
            debug!("DXGI duplication released");
        }
    }

    impl FrameSource for DxgiSource {
        type Frame = DxgiFrame;

        fn open(&mut self, descriptor: &FrameDescriptor) -> Result<(), SourceError> {
            self.state = None;
            self.state = Some(unsafe { DxgiState::create(self.monitor_index, *descriptor)? });
            Ok(())
        }

        fn acquire_next(&mut self, timeout: Duration) -> Result<Acquired<DxgiFrame>, SourceError> {
            let state = self
                .state
                .as_mut()
                .ok_or_else(|| SourceError::Failed("DXGI source is not open".into()))?;
            unsafe { state.acquire(timeout) }
        }

        fn copy_to_system_memory(
            &mut self,
            frame: DxgiFrame,
            dest: &mut [u8],
        ) -> Result<(), SourceError> {
            let state = self
                .state
                .as_mut()
                .ok_or_else(|| SourceError::Failed("DXGI source is not open".into()))?;
            unsafe { state.copy(frame, dest) }
        }

        fn close(&mut self) {
            self.state = None;
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl FrameSource for DxgiSource {
    type Frame = DxgiFrame;

    fn open(&mut self, _descriptor: &FrameDescriptor) -> Result<(), SourceError> {
        Err(SourceError::Unavailable(
            "DXGI Desktop Duplication is only available on Windows".into(),
        ))
    }

    fn acquire_next(&mut self, _timeout: Duration) -> Result<Acquired<DxgiFrame>, SourceError> {
        Err(SourceError::Unavailable("Not supported on this platform".into()))
    }

    fn copy_to_system_memory(
        &mut self,
        _frame: DxgiFrame,
        _dest: &mut [u8],
    ) -> Result<(), SourceError> {
        Err(SourceError::Unavailable("Not supported on this platform".into()))
    }

    fn close(&mut self) {}
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(all(test, not(target_os = "windows")))]
mod tests {
    use super::*;

    #[test]
    fn open_is_unavailable_off_windows() {
        let mut src = DxgiSource::new(0);
        let desc = FrameDescriptor::new(64, 64, 30).unwrap();
        let err = src.open(&desc).unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
        assert_eq!(src.monitor_index(), 0);
        src.close();
    }
}
