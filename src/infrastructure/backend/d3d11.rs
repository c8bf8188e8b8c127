//! D3D11 backend adapter
//!
//! Uses IUnityGraphicsD3D11 to resolve Unity render buffers into
//! ID3D11Texture2D, copies them into per-slot staging textures, and detects
//! completion by mapping with `D3D11_MAP_FLAG_DO_NOT_WAIT`: as long as the
//! GPU still writes the staging texture the runtime answers
//! `DXGI_ERROR_WAS_STILL_DRAWING`, which is exactly the non-blocking poll
//! this adapter needs.

use crate::domain::{
    BackendKind, GraphicsBackendPort, InterceptorError, InterceptorResult, PixelFormat,
    RenderTargetHandle, TargetDesc,
};
use crate::infrastructure::unity::IUnityGraphicsD3D11;
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D, D3D11_CPU_ACCESS_READ,
    D3D11_MAPPED_SUBRESOURCE, D3D11_MAP_FLAG_DO_NOT_WAIT, D3D11_MAP_READ, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_DEFAULT, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
    DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_FORMAT_R8G8B8A8_UNORM_SRGB, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::DXGI_ERROR_WAS_STILL_DRAWING;

/// 発行済みコピーの状態
struct PendingCopy {
    desc: TargetDesc,
    /// poll成功時に保持されるマップ結果（map_resultでUnmapする）
    mapped: Option<D3D11_MAPPED_SUBRESOURCE>,
}

#[derive(Default)]
struct SlotState {
    staging: Option<ID3D11Texture2D>,
    staging_desc: Option<TargetDesc>,
    /// MSAAターゲット用の解決先（非MSAAでは未使用）
    resolve: Option<ID3D11Texture2D>,
    pending: Option<PendingCopy>,
}

/// D3D11 backend adapter
pub struct D3d11BackendAdapter {
    d3d_if: *mut IUnityGraphicsD3D11,
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    slots: Vec<SlotState>,
}

// 生ポインタとCOMポインタを含むがレンダースレッド上でのみ使用される契約。
// グローバルコンテキストへ格納するためSendを実装する。
unsafe impl Send for D3d11BackendAdapter {}

impl D3d11BackendAdapter {
    /// Create a new D3D11 backend adapter.
    ///
    /// # Safety
    /// `d3d_if` must stay valid for the lifetime of the plugin.
    pub unsafe fn new(
        d3d_if: *mut IUnityGraphicsD3D11,
        ring_depth: usize,
    ) -> InterceptorResult<Self> {
        if d3d_if.is_null() {
            return Err(InterceptorError::Initialization(
                "IUnityGraphicsD3D11 interface is null".to_string(),
            ));
        }

        let device_ptr = ((*d3d_if).get_device)();
        // from_raw_borrowedは参照カウントを奪わない。clone()でAddRefして保持する
        let device = ID3D11Device::from_raw_borrowed(&device_ptr)
            .cloned()
            .ok_or_else(|| {
                InterceptorError::Initialization(
                    "Unity D3D11 device is not available yet".to_string(),
                )
            })?;
        let context = device.GetImmediateContext().map_err(|e| {
            InterceptorError::Initialization(format!("GetImmediateContext failed: {:?}", e))
        })?;

        Ok(Self {
            d3d_if,
            device,
            context,
            slots: (0..ring_depth).map(|_| SlotState::default()).collect(),
        })
    }

    /// Map a DXGI format to an output format.
    fn map_format(format: DXGI_FORMAT) -> Option<PixelFormat> {
        match format {
            DXGI_FORMAT_B8G8R8A8_UNORM => Some(PixelFormat::Bgra8),
            DXGI_FORMAT_B8G8R8A8_UNORM_SRGB => Some(PixelFormat::Bgra8Srgb),
            DXGI_FORMAT_R8G8B8A8_UNORM => Some(PixelFormat::Rgba8),
            DXGI_FORMAT_R8G8B8A8_UNORM_SRGB => Some(PixelFormat::Rgba8Srgb),
            _ => None,
        }
    }

    fn dxgi_format(format: PixelFormat) -> DXGI_FORMAT {
        match format {
            PixelFormat::Bgra8 => DXGI_FORMAT_B8G8R8A8_UNORM,
            PixelFormat::Bgra8Srgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
            PixelFormat::Rgba8 => DXGI_FORMAT_R8G8B8A8_UNORM,
            PixelFormat::Rgba8Srgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        }
    }

    /// Resolve a Unity render buffer handle into its backing texture.
    fn source_texture(
        &self,
        handle: &RenderTargetHandle,
    ) -> InterceptorResult<(ID3D11Texture2D, D3D11_TEXTURE2D_DESC)> {
        let texture_ptr = unsafe { ((*self.d3d_if).texture_from_render_buffer)(handle.as_ptr()) };
        let texture = unsafe { ID3D11Texture2D::from_raw_borrowed(&texture_ptr) }
            .cloned()
            .ok_or_else(|| {
                InterceptorError::InvalidHandle(
                    "render buffer has no D3D11 texture".to_string(),
                )
            })?;

        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut desc) };
        Ok((texture, desc))
    }

    fn create_texture(
        &self,
        desc: &TargetDesc,
        staging: bool,
    ) -> InterceptorResult<ID3D11Texture2D> {
        let tex_desc = D3D11_TEXTURE2D_DESC {
            Width: desc.width,
            Height: desc.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: Self::dxgi_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: if staging {
                D3D11_USAGE_STAGING
            } else {
                D3D11_USAGE_DEFAULT
            },
            BindFlags: 0,
            CPUAccessFlags: if staging {
                D3D11_CPU_ACCESS_READ.0 as u32
            } else {
                0
            },
            MiscFlags: 0,
        };

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe {
            self.device
                .CreateTexture2D(&tex_desc, None, Some(&mut texture))
        }
        .map_err(|e| InterceptorError::Other(format!("CreateTexture2D failed: {:?}", e)))?;
        texture.ok_or_else(|| {
            InterceptorError::Other("CreateTexture2D returned null texture".to_string())
        })
    }

    /// Ensure the slot owns a staging texture matching `desc`.
    fn ensure_staging(&mut self, slot: usize, desc: &TargetDesc) -> InterceptorResult<()> {
        if self.slots[slot].staging_desc.as_ref() == Some(desc) {
            return Ok(());
        }
        let staging = self.create_texture(desc, true)?;
        self.slots[slot].staging = Some(staging);
        self.slots[slot].staging_desc = Some(*desc);
        self.slots[slot].resolve = None;
        Ok(())
    }
}

impl GraphicsBackendPort for D3d11BackendAdapter {
    fn describe_target(&mut self, handle: &RenderTargetHandle) -> InterceptorResult<TargetDesc> {
        let (_, tex_desc) = self.source_texture(handle)?;
        let format = Self::map_format(tex_desc.Format).ok_or_else(|| {
            InterceptorError::UnsupportedFormat(format!("DXGI format {:?}", tex_desc.Format))
        })?;
        Ok(TargetDesc::new(tex_desc.Width, tex_desc.Height, format))
    }

    fn issue_copy(
        &mut self,
        handle: &RenderTargetHandle,
        slot: usize,
        desc: &TargetDesc,
    ) -> InterceptorResult<()> {
        let (source, source_desc) = self.source_texture(handle)?;
        self.ensure_staging(slot, desc)?;
        let staging = self.slots[slot]
            .staging
            .clone()
            .ok_or_else(|| InterceptorError::Other("staging texture missing".to_string()))?;

        if source_desc.SampleDesc.Count > 1 {
            // MSAAターゲットは一旦DEFAULTテクスチャに解決してからコピーする
            if self.slots[slot].resolve.is_none() {
                self.slots[slot].resolve = Some(self.create_texture(desc, false)?);
            }
            let resolve = self.slots[slot]
                .resolve
                .clone()
                .ok_or_else(|| InterceptorError::Other("resolve texture missing".to_string()))?;
            unsafe {
                self.context
                    .ResolveSubresource(&resolve, 0, &source, 0, Self::dxgi_format(desc.format));
                self.context.CopyResource(&staging, &resolve);
            }
        } else {
            unsafe { self.context.CopyResource(&staging, &source) };
        }

        self.slots[slot].pending = Some(PendingCopy {
            desc: *desc,
            mapped: None,
        });
        Ok(())
    }

    fn poll_completion(&mut self, slot: usize) -> InterceptorResult<bool> {
        let staging = self.slots[slot]
            .staging
            .clone()
            .ok_or_else(|| InterceptorError::Other("staging texture missing".to_string()))?;
        let Some(pending) = self.slots[slot].pending.as_mut() else {
            return Err(InterceptorError::Other(format!(
                "poll on slot {} with no pending copy",
                slot
            )));
        };
        if pending.mapped.is_some() {
            return Ok(true);
        }

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        let result = unsafe {
            self.context.Map(
                &staging,
                0,
                D3D11_MAP_READ,
                D3D11_MAP_FLAG_DO_NOT_WAIT.0 as u32,
                Some(&mut mapped),
            )
        };
        match result {
            Ok(()) => {
                pending.mapped = Some(mapped);
                Ok(true)
            }
            Err(e) if e.code() == DXGI_ERROR_WAS_STILL_DRAWING => Ok(false),
            Err(e) => Err(InterceptorError::Other(format!(
                "Map(DO_NOT_WAIT) failed: {:?}",
                e
            ))),
        }
    }

    fn map_result(&mut self, slot: usize) -> InterceptorResult<(Vec<u8>, u32)> {
        let pending = self.slots[slot].pending.take().ok_or_else(|| {
            InterceptorError::Other(format!("map on slot {} with no pending copy", slot))
        })?;
        let mapped = pending.mapped.ok_or_else(|| {
            InterceptorError::Other("map_result before poll reported completion".to_string())
        })?;
        let staging = self.slots[slot]
            .staging
            .clone()
            .ok_or_else(|| InterceptorError::Other("staging texture missing".to_string()))?;

        // RowPitchはタイトな行幅より大きいことがある。ストライドごと渡して
        // 消費側に行アドレッシングさせる
        let stride = mapped.RowPitch;
        let byte_size = stride as usize * pending.desc.height as usize;
        let mut data = vec![0u8; byte_size];
        unsafe {
            std::ptr::copy_nonoverlapping(
                mapped.pData as *const u8,
                data.as_mut_ptr(),
                byte_size,
            );
            self.context.Unmap(&staging, 0);
        }

        Ok((data, stride))
    }

    fn release_slot(&mut self, slot: usize) {
        if let Some(pending) = self.slots[slot].pending.take() {
            if pending.mapped.is_some() {
                if let Some(staging) = &self.slots[slot].staging {
                    unsafe { self.context.Unmap(staging, 0) };
                }
            }
        }
        // ステージングはD3D11ランタイムが参照カウントで守るため即時解放してよい
        self.slots[slot].staging = None;
        self.slots[slot].staging_desc = None;
        self.slots[slot].resolve = None;
    }

    fn kind(&self) -> BackendKind {
        BackendKind::D3d11
    }
}

impl Drop for D3d11BackendAdapter {
    fn drop(&mut self) {
        for slot in 0..self.slots.len() {
            self.release_slot(slot);
        }
    }
}
