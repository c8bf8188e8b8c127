//! グラフィックスバックエンドアダプタ
//!
//! `GraphicsBackendPort`の実装群と、ホストのレンダラ種別からの
//! バックエンド選択を提供します。
//!
//! ## モジュール構成
//! - `vulkan`: IUnityGraphicsVulkan経由のVulkanアダプタ（主対象）
//! - `d3d11`: IUnityGraphicsD3D11経由のD3D11アダプタ（Windows + feature）
//! - `mock`: テスト・開発用のシミュレーションアダプタ

pub mod mock;
pub mod vulkan;

#[cfg(all(windows, feature = "d3d11"))]
pub mod d3d11;

use crate::domain::{
    BackendKind, GraphicsBackendPort, InterceptorResult, RenderTargetHandle, TargetDesc,
};
use crate::infrastructure::unity::{
    UnityGfxRenderer, K_UNITY_GFX_RENDERER_D3D11, K_UNITY_GFX_RENDERER_VULKAN,
};

/// ホストのレンダラ種別から対応バックエンドを判定
///
/// # Returns
/// 未対応のレンダラ（D3D12、Metal等）の場合は`None`。
/// その場合プラグインは初期化を行わず、全操作がno-opになる。
pub fn detect_backend_kind(renderer: UnityGfxRenderer) -> Option<BackendKind> {
    match renderer {
        K_UNITY_GFX_RENDERER_VULKAN => Some(BackendKind::Vulkan),
        K_UNITY_GFX_RENDERER_D3D11 => Some(BackendKind::D3d11),
        _ => None,
    }
}

/// 実行時に選択されたバックエンドアダプタ
///
/// 選択はプラグイン初期化時に一度だけ行われるため、trait objectではなく
/// enumディスパッチで保持する。
pub enum BackendSelector {
    Vulkan(vulkan::VulkanBackendAdapter),
    #[cfg(all(windows, feature = "d3d11"))]
    D3d11(d3d11::D3d11BackendAdapter),
    Mock(mock::MockBackendAdapter),
}

impl GraphicsBackendPort for BackendSelector {
    fn describe_target(&mut self, handle: &RenderTargetHandle) -> InterceptorResult<TargetDesc> {
        match self {
            Self::Vulkan(adapter) => adapter.describe_target(handle),
            #[cfg(all(windows, feature = "d3d11"))]
            Self::D3d11(adapter) => adapter.describe_target(handle),
            Self::Mock(adapter) => adapter.describe_target(handle),
        }
    }

    fn issue_copy(
        &mut self,
        handle: &RenderTargetHandle,
        slot: usize,
        desc: &TargetDesc,
    ) -> InterceptorResult<()> {
        match self {
            Self::Vulkan(adapter) => adapter.issue_copy(handle, slot, desc),
            #[cfg(all(windows, feature = "d3d11"))]
            Self::D3d11(adapter) => adapter.issue_copy(handle, slot, desc),
            Self::Mock(adapter) => adapter.issue_copy(handle, slot, desc),
        }
    }

    fn poll_completion(&mut self, slot: usize) -> InterceptorResult<bool> {
        match self {
            Self::Vulkan(adapter) => adapter.poll_completion(slot),
            #[cfg(all(windows, feature = "d3d11"))]
            Self::D3d11(adapter) => adapter.poll_completion(slot),
            Self::Mock(adapter) => adapter.poll_completion(slot),
        }
    }

    fn map_result(&mut self, slot: usize) -> InterceptorResult<(Vec<u8>, u32)> {
        match self {
            Self::Vulkan(adapter) => adapter.map_result(slot),
            #[cfg(all(windows, feature = "d3d11"))]
            Self::D3d11(adapter) => adapter.map_result(slot),
            Self::Mock(adapter) => adapter.map_result(slot),
        }
    }

    fn release_slot(&mut self, slot: usize) {
        match self {
            Self::Vulkan(adapter) => adapter.release_slot(slot),
            #[cfg(all(windows, feature = "d3d11"))]
            Self::D3d11(adapter) => adapter.release_slot(slot),
            Self::Mock(adapter) => adapter.release_slot(slot),
        }
    }

    fn kind(&self) -> BackendKind {
        match self {
            Self::Vulkan(adapter) => adapter.kind(),
            #[cfg(all(windows, feature = "d3d11"))]
            Self::D3d11(adapter) => adapter.kind(),
            Self::Mock(adapter) => adapter.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_backend_kind() {
        assert_eq!(
            detect_backend_kind(K_UNITY_GFX_RENDERER_VULKAN),
            Some(BackendKind::Vulkan)
        );
        assert_eq!(
            detect_backend_kind(K_UNITY_GFX_RENDERER_D3D11),
            Some(BackendKind::D3d11)
        );
        // 未対応レンダラ
        assert_eq!(detect_backend_kind(0), None);
        assert_eq!(detect_backend_kind(99), None);
    }

    #[test]
    fn test_selector_delegates_to_mock() {
        let mut selector = BackendSelector::Mock(mock::MockBackendAdapter::new(4, 4, 2));
        assert_eq!(selector.kind(), BackendKind::Mock);

        let mut token = 0u8;
        let handle = RenderTargetHandle::from_raw(&mut token as *mut u8 as *mut _)
            .expect("non-null");
        let desc = selector.describe_target(&handle).unwrap();
        assert_eq!(desc.width, 4);
        assert_eq!(desc.height, 4);
    }
}
