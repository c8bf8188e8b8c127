/// Port定義（Clean Architectureのインターフェース）
///
/// Domain層が外部実装に依存するための抽象trait。
/// Infrastructure層がこれらを実装し、Application層がDIで注入する。

use crate::domain::{BackendKind, CapturedFrame, InterceptorResult, RenderTargetHandle, TargetDesc};

/// グラフィックスバックエンドポート: GPU読み戻し操作を抽象化
///
/// 能力セットは {IssueCopy, PollCompletion, MapResult}。
/// サポートするグラフィックスAPIごとに1実装が対応する。
///
/// # スロットモデル
/// Readback Engineがin-flightリング（深さ >= 2）を管理し、
/// `slot`番号でバックエンド側の転送リソースを識別する。
/// バックエンドはスロットごとにステージングリソースを保持・再利用する。
///
/// # スレッドモデル
/// すべてのメソッドはレンダースレッドから同期的に呼び出される。
/// いずれのメソッドも転送の発行を超えて呼び出しスレッドをブロックしてはならない。
pub trait GraphicsBackendPort: Send {
    /// レンダーターゲットの記述（サイズ + フォーマット）を取得
    ///
    /// # Returns
    /// - `Ok(TargetDesc)`: 取得成功
    /// - `Err(InvalidHandle)`: ハンドルが無効（ホストが既に破棄済み）
    /// - `Err(UnsupportedFormat)`: 出力フォーマットへのマッピングが未定義
    fn describe_target(&mut self, handle: &RenderTargetHandle) -> InterceptorResult<TargetDesc>;

    /// 非同期コピーを発行し、指定スロットに関連付ける
    ///
    /// GPU→ステージングリソースへの転送を発行するのみで、完了は待たない。
    ///
    /// # Arguments
    /// - `handle`: 今フレームのレンダーターゲット（この呼び出しを超えて保持禁止）
    /// - `slot`: 関連付けるリングスロット番号
    /// - `desc`: `describe_target()`で取得済みの記述
    fn issue_copy(
        &mut self,
        handle: &RenderTargetHandle,
        slot: usize,
        desc: &TargetDesc,
    ) -> InterceptorResult<()>;

    /// スロットのコピーが完了したか問い合わせる
    ///
    /// ポーリングのみで、ビジーウェイトもブロックもしない。
    fn poll_completion(&mut self, slot: usize) -> InterceptorResult<bool>;

    /// 完了したスロットの内容をCPU側バッファへ取り出す
    ///
    /// `poll_completion()`がtrueを返した後にのみ呼び出すこと。
    ///
    /// # Returns
    /// `(ピクセルデータ, 1行のバイト数)`。データはタイトに詰め直されている。
    fn map_result(&mut self, slot: usize) -> InterceptorResult<(Vec<u8>, u32)>;

    /// スロットの転送リソースを解放する
    ///
    /// ターゲット変更（リサイズ等）・タイムアウト・終了時に呼び出される。
    /// GPUがまだ参照している可能性がある場合、実装は安全になるまで
    /// 実際の破棄を遅延させてよい。
    fn release_slot(&mut self, slot: usize);

    /// バックエンド種別を取得
    fn kind(&self) -> BackendKind;
}

/// フレーム消費ポート: 下流コンシューマ（エンコーダ/ファイル/ネットワーク）を抽象化
///
/// 配送シンクの専用スレッド上で呼び出される。
/// フレームの所有権は完全にコンシューマへ移動する。
pub trait FrameConsumerPort: Send {
    /// 完成したフレームを1枚受け取る
    fn consume(&mut self, frame: CapturedFrame);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FrameMetadata, PixelFormat};
    use std::time::Instant;

    struct CountingConsumer {
        count: usize,
    }

    impl FrameConsumerPort for CountingConsumer {
        fn consume(&mut self, _frame: CapturedFrame) {
            self.count += 1;
        }
    }

    #[test]
    fn test_consumer_port_is_object_safe() {
        let mut consumer: Box<dyn FrameConsumerPort> = Box::new(CountingConsumer { count: 0 });
        let meta = FrameMetadata {
            width: 1,
            height: 1,
            format: PixelFormat::Rgba8,
            row_stride: 4,
            sequence: 0,
            captured_at: Instant::now(),
        };
        consumer.consume(CapturedFrame::new(vec![0u8; 4], meta));
    }
}
