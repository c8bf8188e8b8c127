/// ログ・トレーシング基盤
///
/// tracingを使用した統一的なログ出力。
///
/// # ビルドモードとパフォーマンス
/// - **Release ビルド**: ログ関連コードが完全にコンパイルアウトされ、ゼロランタイムオーバーヘッド
/// - **Debug ビルド**: 非同期ログ（tracing-appender）でレンダースレッドへの影響を最小化
///
/// # 設計意図
/// キャプチャはホストのレンダースレッド上で動作するため、
/// ログ出力がフレームタイムに影響しないことを最優先する。

#[cfg(debug_assertions)]
use std::path::PathBuf;
#[cfg(debug_assertions)]
use tracing::info;
#[cfg(debug_assertions)]
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ログシステムを初期化
///
/// プラグインロード時（`UnityPluginLoad`）に1回だけ呼び出される。
///
/// # ビルドモード別の動作
/// - **Release ビルド**: この関数自体が空関数にコンパイル最適化され、ゼロオーバーヘッド
/// - **Debug ビルド**: tracing-appenderで非同期ファイル出力（レンダースレッドはメモリコピーのみ）
///
/// # Arguments
/// - `log_level`: ログレベル（"info", "debug", "trace"等）
/// - `json_format`: JSON形式で出力するか
/// - `log_dir`: ログファイル出力先（None = 標準出力）
///
/// # Returns
/// - Debug: `Some(WorkerGuard)` - プラグインアンロードまで保持必須（Drop時にログスレッド終了）
/// - Release: `None` - オーバーヘッドなし
///
/// # 重要
/// Debugビルドではホストプロセスにstdoutがないことがあるため（Unityエディタ外）、
/// ファイル出力をデフォルトとする。戻り値の`WorkerGuard`はプラグインコンテキストに
/// 保持し、アンロード時にDropすること。
#[cfg(debug_assertions)]
pub fn init_logging(
    log_level: &str,
    json_format: bool,
    log_dir: Option<PathBuf>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match log_dir {
        Some(dir) => {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                // ログディレクトリが作れない場合は標準出力へフォールバック
                eprintln!("RenderingInterceptor: failed to create log dir: {}", e);
                return init_stdout_logging(env_filter, json_format);
            }

            let file_appender =
                tracing_appender::rolling::daily(dir, "rendering_interceptor.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            if json_format {
                let result = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(non_blocking))
                    .try_init();
                if result.is_err() {
                    // 既に初期化済み（ホストの再ロード等）。二重初期化は無害なので無視
                    return Some(guard);
                }
            } else {
                let result = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
                    .try_init();
                if result.is_err() {
                    return Some(guard);
                }
            }

            info!("Logging initialized (async file output)");
            Some(guard)
        }
        None => init_stdout_logging(env_filter, json_format),
    }
}

#[cfg(debug_assertions)]
fn init_stdout_logging(
    env_filter: EnvFilter,
    json_format: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let result = if json_format {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .try_init()
    };

    if result.is_ok() {
        info!("Logging initialized (stdout)");
    }
    None
}

/// Releaseビルドでは空実装（ゼロオーバーヘッド）
#[cfg(not(debug_assertions))]
pub fn init_logging(
    _log_level: &str,
    _json_format: bool,
    _log_dir: Option<std::path::PathBuf>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    None
}
