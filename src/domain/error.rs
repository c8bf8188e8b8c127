/// エラー型定義
///
/// Domain層の統一エラー型。thiserrorを使用して型安全なエラー処理を提供します。
///
/// # 設計方針
/// - unwrap()の使用を禁止し、明示的なエラーハンドリングを強制
/// - フレーム単位のエラー（InvalidHandle / UnsupportedFormat / TransferTimeout）は
///   呼び出し側でログ出力とフレーム破棄により回復する。レンダースレッドへは伝播させない
/// - 初期化時のエラー（BackendDetection / Initialization / Configuration）のみ
///   プラグインロードの失敗として扱う

use thiserror::Error;

/// Domain層の統一エラー型
#[derive(Error, Debug)]
pub enum InterceptorError {
    /// 無効なレンダーターゲットハンドル
    ///
    /// null、またはホストが既に破棄したリソース。
    /// 該当フレームをスキップして継続する。
    #[error("Invalid render target handle: {0}")]
    InvalidHandle(String),

    /// 未対応のピクセルフォーマット
    ///
    /// 初期化時に検出された場合は致命的。実行中のフォーマット変更で
    /// 発生した場合は該当フレームをスキップして継続する。
    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// GPU転送タイムアウト
    ///
    /// 規定フレーム数以内にコピーが完了しなかった。
    /// 該当フレームを破棄して継続する（レンダースレッドを決してブロックしない）。
    #[error("GPU transfer for frame {sequence} timed out after {frames} frames")]
    TransferTimeout { sequence: u64, frames: u32 },

    /// バックエンド検出失敗（致命的）
    ///
    /// 認識できないグラフィックスAPIではインターセプタは動作できない。
    #[error("Backend detection failed: {0}")]
    BackendDetection(String),

    /// 設定関連のエラー
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 初期化エラー
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// フレーム配送エラー
    #[error("Frame delivery error: {0}")]
    Delivery(String),

    /// その他のエラー
    #[error("Unexpected error: {0}")]
    Other(String),
}

impl InterceptorError {
    /// フレーム単位で回復可能なエラーか判定
    ///
    /// # Returns
    /// ログ出力とフレーム破棄のみで継続できる場合は true
    pub fn is_per_frame(&self) -> bool {
        matches!(
            self,
            Self::InvalidHandle(_)
                | Self::UnsupportedFormat(_)
                | Self::TransferTimeout { .. }
                | Self::Delivery(_)
        )
    }
}

/// Domain層の統一Result型
pub type InterceptorResult<T> = Result<T, InterceptorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_frame_errors_are_recoverable() {
        assert!(InterceptorError::InvalidHandle("null".into()).is_per_frame());
        assert!(InterceptorError::TransferTimeout { sequence: 1, frames: 8 }.is_per_frame());
        assert!(InterceptorError::UnsupportedFormat("R16G16B16A16".into()).is_per_frame());
    }

    #[test]
    fn test_initialization_errors_are_fatal() {
        assert!(!InterceptorError::BackendDetection("unknown renderer 99".into()).is_per_frame());
        assert!(!InterceptorError::Initialization("no device".into()).is_per_frame());
        assert!(!InterceptorError::Configuration("ring_depth = 0".into()).is_per_frame());
    }
}
