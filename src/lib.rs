//! RenderingInterceptor - Unityネイティブレンダリングキャプチャプラグイン
//!
//! Unityのレンダースレッド上でフレーム終端のカラーバッファを横取りし、
//! GPUをストールさせずにCPU側へ読み戻してコンシューマへ配送する
//! ネイティブプラグイン(cdylib)です。
//!
//! # アーキテクチャ
//! ヘキサゴナルアーキテクチャ（ポートとアダプタ）を採用:
//! - `domain`: 型・ポート定義・設定・エラー（外部依存なしの中核）
//! - `application`: キャプチャのユースケース（読み戻しリング、配送、状態機械）
//! - `infrastructure`: Unity ABI宣言とバックエンド/コンシューマのアダプタ
//! - `ffi`: ホストへエクスポートするシンボル境界
//!
//! # データフロー
//! ```text
//! set_render_buffer(rb)                    ホスト(C#)から毎フレーム
//!   └→ pending登録
//! GL.IssuePluginEvent(rendering_event_ptr(), 1)
//!   └→ rendering_event(1)                 レンダースレッド
//!        └→ ReadbackEngine::capture       非同期コピー発行 + 完了回収
//!             └→ DeliverySink::submit     有界キュー(drop-newest)
//!                  └→ 配送スレッド → 登録済みコールバック
//! ```

pub mod application;
pub mod domain;
pub mod ffi;
pub mod infrastructure;
pub mod logging;
