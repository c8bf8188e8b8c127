//! Application Layer
//!
//! キャプチャのユースケースを実装します。
//!
//! ## モジュール構成
//! - `interceptor`: Set-Buffer / Issue-Eventで駆動されるオーケストレータ
//! - `readback`: in-flightリングによるGPU→CPU読み戻しエンジン
//! - `delivery`: 有界キュー + 専用スレッドによるフレーム配送
//! - `lifecycle`: 状態機械 {Uninitialized → Ready → Capturing}
//! - `stats`: 統計情報管理（FPS、レイテンシ、ドロップ数）

pub mod delivery;
pub mod interceptor;
pub mod lifecycle;
pub mod readback;
pub mod stats;
