//! FFI境界（Unityネイティブプラグインのエクスポート）
//!
//! ホストから見えるシンボルはここに集約する:
//! - `UnityPluginLoad` / `UnityPluginUnload`: プラグインライフサイクル
//! - `rendering_event_ptr`: `GL.IssuePluginEvent`へ渡すコールバックの取得
//! - `set_render_buffer`: 今フレームのレンダーターゲット登録
//! - `set_frame_callback`: フレーム受信コールバックの登録
//!
//! # 安全契約
//! どのエクスポート関数からもpanicをホストへ逃がさない。コールバックは
//! すべて`catch_unwind`で包み、パニックはログ + no-opに縮退する。

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::null_mut;
use std::sync::{RwLock, RwLockWriteGuard};

use libc::{c_int, c_void};

use crate::application::interceptor::{RenderingInterceptor, CAPTURE_EVENT_ID};
use crate::domain::{InterceptorConfig, InterceptorError, RenderTargetHandle};
use crate::infrastructure::backend::vulkan::VulkanBackendAdapter;
use crate::infrastructure::backend::{detect_backend_kind, BackendSelector};
use crate::infrastructure::consumer::{
    register_frame_callback, FrameCallbackFn, SharedCallbackConsumer,
};
use crate::infrastructure::unity::{
    IUnityGraphics, IUnityGraphicsVulkan, IUnityInterfaces, UnityGfxDeviceEventType,
    UnityRenderBuffer, UnityRenderingEvent, UnityVulkanPluginEventConfig,
    K_UNITY_GFX_DEVICE_EVENT_INITIALIZE, K_UNITY_GFX_DEVICE_EVENT_SHUTDOWN,
    K_UNITY_VULKAN_GRAPHICS_QUEUE_ACCESS_DONT_CARE, K_UNITY_VULKAN_RENDER_PASS_ENSURE_OUTSIDE,
};
use crate::{domain::BackendKind, logging};

/// プラグインのプロセス全体状態
struct PluginContext {
    interceptor: RenderingInterceptor<BackendSelector>,
    /// 非同期ログのフラッシュ保証。アンロード時のDropでログスレッドが終了する
    _log_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

// レンダースレッドとホストのメインスレッドからアクセスされるため、
// RwLockで直列化した上でSend/Syncを宣言する。バックエンドの生ポインタは
// レンダースレッド上でのみ逆参照される契約。
unsafe impl Send for PluginContext {}
unsafe impl Sync for PluginContext {}

static CONTEXT: RwLock<Option<PluginContext>> = RwLock::new(None);

thread_local! {
    static INTERFACES: Cell<*mut IUnityInterfaces> = const { Cell::new(null_mut()) };
    static GFX_IF: Cell<*mut IUnityGraphics> = const { Cell::new(null_mut()) };
}

/// ポイズニングを無視してコンテキストの書き込みロックを取る
///
/// パニックは`catch_unwind`で回収済みなので、ポイズンされたロックを
/// そのまま引き継いでもプラグインの継続動作に支障はない。
fn lock_context() -> RwLockWriteGuard<'static, Option<PluginContext>> {
    CONTEXT.write().unwrap_or_else(|e| e.into_inner())
}

/// `GL.IssuePluginEvent`へ渡すイベントコールバックを取得
#[no_mangle]
pub extern "system" fn rendering_event_ptr() -> UnityRenderingEvent {
    rendering_event
}

/// ホストのグラフィックスコマンドキュー上で実行されるイベントコールバック
///
/// レンダースレッドから呼び出される。キャプチャ側のいかなる障害も
/// ここで縮退し、ホストへは伝播しない。
extern "system" fn rendering_event(event_id: c_int) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut guard = lock_context();
        if let Some(context) = guard.as_mut() {
            context.interceptor.handle_event(event_id);
        }
    }));
    if result.is_err() {
        tracing::error!(event_id, "Panic in rendering event callback (recovered)");
    }
}

/// 今フレームのレンダーターゲットを登録
///
/// 毎フレーム、イベント発行（`GL.IssuePluginEvent`）より前にホストの
/// グルーコードから呼び出される。nullはログのみのno-op。
#[no_mangle]
pub extern "system" fn set_render_buffer(rb: UnityRenderBuffer) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut guard = lock_context();
        if let Some(context) = guard.as_mut() {
            context
                .interceptor
                .set_render_buffer(RenderTargetHandle::from_raw(rb));
        }
    }));
    if result.is_err() {
        tracing::error!("Panic in set_render_buffer (recovered)");
    }
}

/// フレーム受信コールバックを登録・解除
///
/// コールバックは配送スレッド上で呼び出される。`callback`にnullを渡すと
/// 解除される。プラグイン初期化の前後いずれでも呼び出せる。
#[no_mangle]
pub extern "system" fn set_frame_callback(
    callback: Option<FrameCallbackFn>,
    user_data: *mut c_void,
) {
    register_frame_callback(callback, user_data);
}

/// 検出されたバックエンドのアダプタを構築する
///
/// # Safety
/// `ifs`は有効なIUnityInterfacesであること（Unityから渡されたものをそのまま使う）。
unsafe fn build_backend(
    ifs: *mut IUnityInterfaces,
    kind: BackendKind,
    ring_depth: usize,
) -> Option<BackendSelector> {
    match kind {
        BackendKind::Vulkan => {
            let vk_if =
                ((*ifs).get_interface)(IUnityGraphicsVulkan::GUID) as *mut IUnityGraphicsVulkan;
            let adapter = match VulkanBackendAdapter::new(vk_if, ring_depth) {
                Ok(adapter) => adapter,
                Err(e) => {
                    tracing::error!("Vulkan backend initialization failed: {}", e);
                    return None;
                }
            };

            // コピーコマンドはレンダーパス外でのみ記録できる。イベント実行前に
            // Unity側でレンダーパスを閉じてもらう
            let event_config = UnityVulkanPluginEventConfig {
                render_pass_precondition: K_UNITY_VULKAN_RENDER_PASS_ENSURE_OUTSIDE,
                graphics_queue_access: K_UNITY_VULKAN_GRAPHICS_QUEUE_ACCESS_DONT_CARE,
                flags: 0,
            };
            ((*vk_if).configure_event)(CAPTURE_EVENT_ID, &event_config);

            Some(BackendSelector::Vulkan(adapter))
        }
        #[cfg(all(windows, feature = "d3d11"))]
        BackendKind::D3d11 => {
            use crate::infrastructure::backend::d3d11::D3d11BackendAdapter;
            use crate::infrastructure::unity::IUnityGraphicsD3D11;

            let d3d_if =
                ((*ifs).get_interface)(IUnityGraphicsD3D11::GUID) as *mut IUnityGraphicsD3D11;
            match D3d11BackendAdapter::new(d3d_if, ring_depth) {
                Ok(adapter) => Some(BackendSelector::D3d11(adapter)),
                Err(e) => {
                    tracing::error!("D3D11 backend initialization failed: {}", e);
                    None
                }
            }
        }
        #[cfg(not(all(windows, feature = "d3d11")))]
        BackendKind::D3d11 => {
            tracing::error!("D3D11 renderer detected but the d3d11 feature is not enabled");
            None
        }
        BackendKind::Mock => None,
    }
}

/// グラフィックスデバイスイベントハンドラ
///
/// Initialize: レンダラ判定 → 設定ロード → バックエンド構築 → コンテキスト格納。
/// Shutdown: コンテキストを取り出して破棄（in-flight排出 + 配送スレッドjoin）。
extern "system" fn gfx_event_handler(event_type: UnityGfxDeviceEventType) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        if event_type == K_UNITY_GFX_DEVICE_EVENT_INITIALIZE {
            let renderer = GFX_IF.with(|o| unsafe { ((*o.get()).get_renderer)() });
            let Some(kind) = detect_backend_kind(renderer) else {
                // 未対応レンダラ。プラグインは何もしない
                // （ロード直後の手動Initializeではデバイス未作成でここを通る）
                let e = InterceptorError::BackendDetection(format!(
                    "unsupported renderer type {}",
                    renderer
                ));
                tracing::error!("{}", e);
                return;
            };

            // ロード時の手動Initializeとデバイスイベントの二重初期化をガード
            if lock_context().is_some() {
                tracing::debug!("Interceptor already initialized, ignoring duplicate event");
                return;
            }

            let mut config = InterceptorConfig::load_or_default();
            if let Err(e) = config.validate() {
                tracing::warn!("Invalid configuration, falling back to defaults: {}", e);
                config = InterceptorConfig::default();
            }
            let log_guard = logging::init_logging(
                &config.logging.level,
                config.logging.json_format,
                config.logging.directory.clone(),
            );
            tracing::info!(renderer, ?kind, "Graphics device initialized");

            let ifs = INTERFACES.with(|v| v.get());
            let Some(backend) = (unsafe { build_backend(ifs, kind, config.readback.ring_depth) })
            else {
                return;
            };

            let interceptor =
                RenderingInterceptor::new(backend, &config, Box::new(SharedCallbackConsumer));
            *lock_context() = Some(PluginContext {
                interceptor,
                _log_guard: log_guard,
            });
        } else if event_type == K_UNITY_GFX_DEVICE_EVENT_SHUTDOWN {
            if let Some(context) = lock_context().take() {
                context.interceptor.shutdown();
            }
        }
    }));
    if result.is_err() {
        tracing::error!(event_type, "Panic in graphics device event handler (recovered)");
    }
}

/// プラグインロードエントリポイント
///
/// デバイスイベントコールバックを登録した上で、ロード時点で既にデバイスが
/// 存在するケースのためにInitializeを手動発火する。
/// ref: https://docs.unity3d.com/Manual/NativePluginInterface.html
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn UnityPluginLoad(ifs: *mut IUnityInterfaces) {
    INTERFACES.with(|v| v.set(ifs));
    let gfx_if = unsafe { ((*ifs).get_interface)(IUnityGraphics::GUID) as *mut IUnityGraphics };
    GFX_IF.with(|v| v.set(gfx_if));
    unsafe { ((*gfx_if).register_device_event_callback)(gfx_event_handler) };

    gfx_event_handler(K_UNITY_GFX_DEVICE_EVENT_INITIALIZE);
}

/// プラグインアンロードエントリポイント
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn UnityPluginUnload() {
    // Shutdownイベントを経ずにアンロードされるケースに備えて明示破棄する
    if let Some(context) = lock_context().take() {
        context.interceptor.shutdown();
    }
    GFX_IF.with(|o| {
        let gfx_if = o.get();
        if !gfx_if.is_null() {
            unsafe { ((*gfx_if).unregister_device_event_callback)(gfx_event_handler) };
        }
    });
}
