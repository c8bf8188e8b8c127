//! 設定管理
//!
//! TOML設定ファイルの読み込みとDomain型への変換。
//! プラグインロード時に実行ディレクトリの `rendering_interceptor.toml` を読み、
//! 存在しなければデフォルト設定で動作する。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::{InterceptorError, InterceptorResult};

/// プラグイン設定のルート構造
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct InterceptorConfig {
    /// 読み戻し（GPU→CPU転送）設定
    #[serde(default)]
    pub readback: ReadbackConfig,
    /// フレーム配送設定
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// ログ設定
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 読み戻し設定
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReadbackConfig {
    /// in-flightリングの深さ
    ///
    /// 新しいコピー発行が過去のマップを待たないよう、2以上が必須。
    /// デフォルト: 3
    pub ring_depth: usize,

    /// GPUコピー完了を待つ上限フレーム数
    ///
    /// この回数のイベント呼び出しを超えて完了しない転送は
    /// ドロップ扱いとなる（レンダースレッドは決してブロックしない）。
    /// デフォルト: 8
    pub copy_timeout_frames: u32,
}

impl ReadbackConfig {
    /// デフォルトのリング深さ
    pub const DEFAULT_RING_DEPTH: usize = 3;
    /// リング深さの下限
    pub const MIN_RING_DEPTH: usize = 2;
    /// デフォルトのコピータイムアウト（フレーム数）
    pub const DEFAULT_COPY_TIMEOUT_FRAMES: u32 = 8;
}

impl Default for ReadbackConfig {
    fn default() -> Self {
        Self {
            ring_depth: Self::DEFAULT_RING_DEPTH,
            copy_timeout_frames: Self::DEFAULT_COPY_TIMEOUT_FRAMES,
        }
    }
}

/// フレーム配送設定
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeliveryConfig {
    /// 配送キューの深さ
    ///
    /// コンシューマが生産より遅い場合、この深さを超えた新規フレームは
    /// ドロップされる（drop-newestポリシー、無制限のメモリ増加を防ぐ）。
    /// デフォルト: 2
    pub queue_depth: usize,
}

impl DeliveryConfig {
    /// デフォルトのキュー深さ
    pub const DEFAULT_QUEUE_DEPTH: usize = 2;
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_depth: Self::DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// ログ設定
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoggingConfig {
    /// ログレベル（"info", "debug", "trace"等）
    pub level: String,
    /// JSON形式で出力するか
    pub json_format: bool,
    /// ログファイル出力先ディレクトリ（None = 標準出力）
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            directory: Some(PathBuf::from("logs")),
        }
    }
}

impl InterceptorConfig {
    /// デフォルトの設定ファイル名
    pub const DEFAULT_FILE_NAME: &'static str = "rendering_interceptor.toml";

    /// TOMLファイルから設定を読み込む
    ///
    /// # Returns
    /// - `Ok(config)`: 読み込み + パース成功
    /// - `Err(Configuration)`: ファイルが存在しない、またはパース失敗
    pub fn from_file<P: AsRef<Path>>(path: P) -> InterceptorResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            InterceptorError::Configuration(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        toml::from_str(&content)
            .map_err(|e| InterceptorError::Configuration(format!("Failed to parse TOML: {}", e)))
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを返す
    pub fn load_or_default() -> Self {
        match Self::from_file(Self::DEFAULT_FILE_NAME) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", Self::DEFAULT_FILE_NAME);
                config
            }
            Err(e) => {
                tracing::debug!("Using default configuration ({})", e);
                Self::default()
            }
        }
    }

    /// 設定値の検証
    ///
    /// # Returns
    /// - `Ok(())`: すべての値が有効範囲内
    /// - `Err(Configuration)`: 不正な値を検出
    pub fn validate(&self) -> InterceptorResult<()> {
        if self.readback.ring_depth < ReadbackConfig::MIN_RING_DEPTH {
            return Err(InterceptorError::Configuration(format!(
                "readback.ring_depth must be >= {} (got {})",
                ReadbackConfig::MIN_RING_DEPTH,
                self.readback.ring_depth
            )));
        }

        if self.readback.copy_timeout_frames == 0 {
            return Err(InterceptorError::Configuration(
                "readback.copy_timeout_frames must be >= 1".to_string(),
            ));
        }

        if self.delivery.queue_depth == 0 {
            return Err(InterceptorError::Configuration(
                "delivery.queue_depth must be >= 1".to_string(),
            ));
        }

        Ok(())
    }
}
