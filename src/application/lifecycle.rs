//! ライフサイクル状態管理モジュール
//!
//! インターセプタの状態遷移 {Uninitialized → Ready → Capturing → Ready (loop)} を
//! 明示的な状態機械として管理します。ホストプロセスがロードされている間に
//! 終端状態はなく、プラグインアンロードで全体が破棄されます。

/// キャプチャ状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// バックエンド未検出。イベントが来てもすべてno-op
    Uninitialized,
    /// 次のイベント呼び出しを受け付け可能
    Ready,
    /// イベント処理中（読み戻し発行〜完了/タイムアウト）
    Capturing,
}

/// 状態遷移の管理
///
/// レンダースレッドから同期的にのみ触れられるため、内部に同期機構は持たない。
#[derive(Debug)]
pub struct LifecycleState {
    state: CaptureState,
}

impl LifecycleState {
    /// 未初期化状態で作成
    pub fn new() -> Self {
        Self {
            state: CaptureState::Uninitialized,
        }
    }

    /// 現在の状態を取得
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Uninitialized → Ready（バックエンド検出成功時）
    ///
    /// # Returns
    /// 遷移できた場合は true（Uninitialized以外からはno-op）
    pub fn on_backend_detected(&mut self) -> bool {
        if self.state == CaptureState::Uninitialized {
            self.state = CaptureState::Ready;
            true
        } else {
            false
        }
    }

    /// Ready → Capturing（有効なpendingスロット付きのイベント呼び出し）
    ///
    /// # Returns
    /// 遷移できた場合は true。Uninitializedではキャプチャ不可
    pub fn begin_capture(&mut self) -> bool {
        if self.state == CaptureState::Ready {
            self.state = CaptureState::Capturing;
            true
        } else {
            false
        }
    }

    /// Capturing → Ready（読み戻しの完了またはタイムアウト）
    pub fn end_capture(&mut self) {
        if self.state == CaptureState::Capturing {
            self.state = CaptureState::Ready;
        }
    }

    /// イベントを受け付け可能か
    pub fn is_ready(&self) -> bool {
        self.state == CaptureState::Ready
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_uninitialized() {
        let lifecycle = LifecycleState::new();
        assert_eq!(lifecycle.state(), CaptureState::Uninitialized);
        assert!(!lifecycle.is_ready());
    }

    #[test]
    fn test_backend_detection_transitions_to_ready() {
        let mut lifecycle = LifecycleState::new();
        assert!(lifecycle.on_backend_detected());
        assert_eq!(lifecycle.state(), CaptureState::Ready);

        // 2回目はno-op
        assert!(!lifecycle.on_backend_detected());
        assert_eq!(lifecycle.state(), CaptureState::Ready);
    }

    #[test]
    fn test_capture_cycle() {
        let mut lifecycle = LifecycleState::new();
        lifecycle.on_backend_detected();

        assert!(lifecycle.begin_capture());
        assert_eq!(lifecycle.state(), CaptureState::Capturing);

        lifecycle.end_capture();
        assert_eq!(lifecycle.state(), CaptureState::Ready);

        // ループして再度キャプチャ可能
        assert!(lifecycle.begin_capture());
        lifecycle.end_capture();
        assert!(lifecycle.is_ready());
    }

    #[test]
    fn test_capture_rejected_before_initialization() {
        let mut lifecycle = LifecycleState::new();
        assert!(!lifecycle.begin_capture());
        assert_eq!(lifecycle.state(), CaptureState::Uninitialized);
    }

    #[test]
    fn test_nested_begin_capture_rejected() {
        let mut lifecycle = LifecycleState::new();
        lifecycle.on_backend_detected();
        assert!(lifecycle.begin_capture());
        // ホスト契約上は起こらないが、再入されても状態を壊さない
        assert!(!lifecycle.begin_capture());
        assert_eq!(lifecycle.state(), CaptureState::Capturing);
    }
}
