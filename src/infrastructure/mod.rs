//! Infrastructure Layer
//!
//! ドメイン層のポートに対する具体的な実装（アダプタ）と、
//! ホストランタイムのABI宣言を提供します。
//!
//! ## モジュール構成
//! - `unity`: IUnityInterfaces / IUnityGraphics / IUnityGraphicsVulkan等のABI宣言
//! - `backend`: GraphicsBackendPortの実装群（Vulkan / D3D11 / Mock）
//! - `consumer`: FrameConsumerPortの実装群（Cコールバック / Null）

pub mod backend;
pub mod consumer;
pub mod unity;
