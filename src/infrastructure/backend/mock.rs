/// モックバックエンドアダプタ
///
/// テスト・開発用のGraphicsBackendPort実装。実GPUの代わりに、
/// 設定可能な「フレームバッファ」からのコピーを既定レイテンシ付きで
/// シミュレートする。リソース解放順序の検証用に計装ログを持つ。

use crate::domain::{
    BackendKind, GraphicsBackendPort, InterceptorError, InterceptorResult, PixelFormat,
    RenderTargetHandle, TargetDesc,
};
use std::sync::{Arc, Mutex};

/// リソース解放イベント（計装用）
///
/// プラグインアンロード時の解放順序（スロット→デバイス）を
/// テストで検証するために記録される。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseEvent {
    /// スロットの転送リソース解放
    Slot(usize),
    /// アダプタ自体の破棄（デバイスレベルのリソース解放に相当）
    Device,
}

/// 次のissue_copyで注入する失敗
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// ハンドルが無効（ホストが破棄済み）
    InvalidHandle,
    /// フォーマットのマッピング未定義
    UnsupportedFormat,
}

/// in-flight転送のシミュレーション状態
struct MockSlot {
    /// 発行時点のフレームバッファのスナップショット
    ///
    /// GPUコピーのセマンティクスを模倣する: 発行後のフレームバッファへの
    /// 書き込みはキャプチャ結果に影響しない。
    pixels: Vec<u8>,
    stride: u32,
    /// 完了までの残りpoll回数
    remaining: u32,
}

/// モックバックエンドアダプタ
pub struct MockBackendAdapter {
    desc: TargetDesc,
    /// 「GPU上のレンダーターゲット」の現在の内容
    framebuffer: Vec<u8>,
    /// 発行から完了までのpoll回数（u32::MAXで「完了しない」）
    latency_frames: u32,
    slots: Vec<Option<MockSlot>>,
    next_failure: Option<MockFailure>,
    release_log: Arc<Mutex<Vec<ReleaseEvent>>>,
}

impl MockBackendAdapter {
    /// 新しいモックバックエンドを作成
    ///
    /// フレームバッファはゼロ初期化される。
    pub fn new(width: u32, height: u32, ring_depth: usize) -> Self {
        let desc = TargetDesc::new(width, height, PixelFormat::Rgba8);
        Self {
            desc,
            framebuffer: vec![0u8; desc.byte_size()],
            latency_frames: 1,
            slots: (0..ring_depth).map(|_| None).collect(),
            next_failure: None,
            release_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 完了レイテンシを設定（u32::MAXで「決して完了しない」転送を再現）
    pub fn set_latency_frames(&mut self, frames: u32) {
        self.latency_frames = frames;
    }

    /// レンダーターゲットの内容を書き換える
    ///
    /// # Panics
    /// データ長が現在のターゲットサイズと一致しない場合（テスト記述ミス検出用）
    pub fn set_source_pixels(&mut self, pixels: Vec<u8>) {
        assert_eq!(
            pixels.len(),
            self.desc.byte_size(),
            "source pixel size must match target desc"
        );
        self.framebuffer = pixels;
    }

    /// ターゲットの解像度変更（ウィンドウリサイズ）を再現
    pub fn resize_target(&mut self, width: u32, height: u32) {
        self.desc = TargetDesc::new(width, height, self.desc.format);
        self.framebuffer = vec![0u8; self.desc.byte_size()];
    }

    /// 次のissue_copyを指定のエラーで失敗させる
    pub fn fail_next_issue(&mut self, failure: MockFailure) {
        self.next_failure = Some(failure);
    }

    /// 計装ログへのハンドルを取得
    ///
    /// アダプタ自体が（インターセプタごと）ムーブ・破棄された後でも
    /// 解放順序を検証できるよう、Arcを複製して返す。
    pub fn release_log(&self) -> Arc<Mutex<Vec<ReleaseEvent>>> {
        Arc::clone(&self.release_log)
    }
}

impl GraphicsBackendPort for MockBackendAdapter {
    fn describe_target(&mut self, _handle: &RenderTargetHandle) -> InterceptorResult<TargetDesc> {
        Ok(self.desc)
    }

    fn issue_copy(
        &mut self,
        _handle: &RenderTargetHandle,
        slot: usize,
        desc: &TargetDesc,
    ) -> InterceptorResult<()> {
        if let Some(failure) = self.next_failure.take() {
            return Err(match failure {
                MockFailure::InvalidHandle => {
                    InterceptorError::InvalidHandle("mock: host destroyed resource".to_string())
                }
                MockFailure::UnsupportedFormat => {
                    InterceptorError::UnsupportedFormat("mock: no output mapping".to_string())
                }
            });
        }

        // 発行時点のスナップショットを取る（= GPUコピーの発行）
        self.slots[slot] = Some(MockSlot {
            pixels: self.framebuffer.clone(),
            stride: desc.tight_stride(),
            remaining: self.latency_frames,
        });
        Ok(())
    }

    fn poll_completion(&mut self, slot: usize) -> InterceptorResult<bool> {
        match &mut self.slots[slot] {
            Some(s) if s.remaining == 0 => Ok(true),
            Some(s) => {
                if s.remaining != u32::MAX {
                    s.remaining -= 1;
                }
                Ok(false)
            }
            None => Err(InterceptorError::Other(format!(
                "mock: poll on empty slot {}",
                slot
            ))),
        }
    }

    fn map_result(&mut self, slot: usize) -> InterceptorResult<(Vec<u8>, u32)> {
        let state = self.slots[slot].take().ok_or_else(|| {
            InterceptorError::Other(format!("mock: map on empty slot {}", slot))
        })?;
        Ok((state.pixels, state.stride))
    }

    fn release_slot(&mut self, slot: usize) {
        self.slots[slot] = None;
        self.release_log
            .lock()
            .unwrap()
            .push(ReleaseEvent::Slot(slot));
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }
}

impl Drop for MockBackendAdapter {
    fn drop(&mut self) {
        self.release_log.lock().unwrap().push(ReleaseEvent::Device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_void;

    fn handle(token: &mut u8) -> RenderTargetHandle {
        RenderTargetHandle::from_raw(token as *mut u8 as *mut c_void).expect("non-null")
    }

    #[test]
    fn test_copy_snapshots_framebuffer() {
        let mut token = 0u8;
        let h = handle(&mut token);
        let mut mock = MockBackendAdapter::new(2, 2, 2);
        mock.set_latency_frames(0);
        mock.set_source_pixels(vec![7u8; 16]);

        let desc = mock.describe_target(&h).unwrap();
        mock.issue_copy(&h, 0, &desc).unwrap();

        // 発行後の書き換えはキャプチャ結果に影響しない
        mock.set_source_pixels(vec![9u8; 16]);

        assert!(mock.poll_completion(0).unwrap());
        let (pixels, stride) = mock.map_result(0).unwrap();
        assert_eq!(pixels, vec![7u8; 16]);
        assert_eq!(stride, 8);
    }

    #[test]
    fn test_latency_counts_polls() {
        let mut token = 0u8;
        let h = handle(&mut token);
        let mut mock = MockBackendAdapter::new(2, 2, 1);
        mock.set_latency_frames(2);

        let desc = mock.describe_target(&h).unwrap();
        mock.issue_copy(&h, 0, &desc).unwrap();

        assert!(!mock.poll_completion(0).unwrap());
        assert!(!mock.poll_completion(0).unwrap());
        assert!(mock.poll_completion(0).unwrap());
    }

    #[test]
    fn test_injected_failures() {
        let mut token = 0u8;
        let h = handle(&mut token);
        let mut mock = MockBackendAdapter::new(2, 2, 1);
        let desc = mock.describe_target(&h).unwrap();

        mock.fail_next_issue(MockFailure::InvalidHandle);
        assert!(matches!(
            mock.issue_copy(&h, 0, &desc),
            Err(InterceptorError::InvalidHandle(_))
        ));

        // 失敗は1回限り
        assert!(mock.issue_copy(&h, 0, &desc).is_ok());
    }

    #[test]
    fn test_release_order_instrumentation() {
        let mut token = 0u8;
        let h = handle(&mut token);
        let mut mock = MockBackendAdapter::new(2, 2, 2);
        let log = mock.release_log();

        let desc = mock.describe_target(&h).unwrap();
        mock.issue_copy(&h, 0, &desc).unwrap();
        mock.release_slot(0);
        drop(mock);

        let events = log.lock().unwrap();
        assert_eq!(*events, vec![ReleaseEvent::Slot(0), ReleaseEvent::Device]);
    }
}
