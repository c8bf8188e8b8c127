//! フレーム消費アダプタ
//!
//! キャプチャ済みフレームの引き渡し先(`FrameConsumerPort`)の実装群。
//! 本番ではホスト側が登録したCコールバックへ配送し、未登録の間は
//! フレームを黙って破棄します。
//!
//! # コールバック契約
//! コールバックは配送スレッド上で呼び出される。`info`と`data`の指す
//! メモリは呼び出し中のみ有効で、コールバックから戻った後に参照しては
//! ならない。保持したい場合はコールバック内でコピーすること。

use crate::domain::{CapturedFrame, FrameConsumerPort};
use std::ffi::c_void;
use std::sync::RwLock;

/// コールバックへ渡すフレーム記述（ABI境界のためrepr(C)）
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NativeFrameInfo {
    pub width: u32,
    pub height: u32,
    /// 行ストライド（バイト）。タイト幅より大きいことがある
    pub row_stride: u32,
    /// ピクセルフォーマット識別子（`PixelFormat::abi_code`）
    pub format: i32,
    /// 単調増加のフレーム連番
    pub sequence: u64,
    /// `data`の全長（バイト）
    pub data_len: usize,
}

/// ホストが登録するフレーム受信コールバック
pub type FrameCallbackFn =
    extern "system" fn(info: *const NativeFrameInfo, data: *const u8, user_data: *mut c_void);

/// 登録済みコールバックとそのユーザーデータ
struct CallbackRegistration {
    callback: FrameCallbackFn,
    user_data: *mut c_void,
}

// user_dataの扱いはホスト側の責務（登録時にスレッドを跨ぐことへ同意している）
unsafe impl Send for CallbackRegistration {}
unsafe impl Sync for CallbackRegistration {}

/// プロセス全体で共有されるコールバック登録
///
/// 配送スレッド（読み取り）とホストの登録呼び出し（書き込み）が競合するため
/// RwLockで保護する。
static REGISTRATION: RwLock<Option<CallbackRegistration>> = RwLock::new(None);

/// フレーム受信コールバックを登録・解除する
///
/// # Arguments
/// - `callback`: 受信コールバック。`None`で解除
/// - `user_data`: コールバックへそのまま渡される不透明ポインタ
pub fn register_frame_callback(callback: Option<FrameCallbackFn>, user_data: *mut c_void) {
    let registration = callback.map(|callback| CallbackRegistration {
        callback,
        user_data,
    });
    match REGISTRATION.write() {
        Ok(mut guard) => {
            let registered = registration.is_some();
            *guard = registration;
            tracing::info!(registered, "Frame callback registration updated");
        }
        Err(e) => {
            tracing::error!("Frame callback registry lock poisoned: {}", e);
        }
    }
}

/// 登録済みコールバックへフレームを配送するコンシューマ
///
/// コールバックが未登録の間はフレームを破棄する（エラーではない:
/// ホストが受信準備を終える前からキャプチャは走り得る）。
pub struct SharedCallbackConsumer;

impl FrameConsumerPort for SharedCallbackConsumer {
    fn consume(&mut self, frame: CapturedFrame) {
        let guard = match REGISTRATION.read() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("Frame callback registry lock poisoned: {}", e);
                return;
            }
        };
        let Some(registration) = guard.as_ref() else {
            tracing::trace!(
                sequence = frame.meta.sequence,
                "No frame callback registered, dropping frame"
            );
            return;
        };

        let info = NativeFrameInfo {
            width: frame.meta.width,
            height: frame.meta.height,
            row_stride: frame.meta.row_stride,
            format: frame.meta.format.abi_code(),
            sequence: frame.meta.sequence,
            data_len: frame.data.len(),
        };
        (registration.callback)(&info, frame.data.as_ptr(), registration.user_data);
    }
}

/// フレームを破棄するだけのコンシューマ（診断ログのみ）
pub struct NullConsumer;

impl FrameConsumerPort for NullConsumer {
    fn consume(&mut self, frame: CapturedFrame) {
        tracing::trace!(
            sequence = frame.meta.sequence,
            bytes = frame.data.len(),
            "Frame discarded by null consumer"
        );
    }
}
