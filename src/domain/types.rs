/// コア型定義
///
/// Domain層の中心となるデータ構造。
/// ABI境界で受け取った生ポインタは即座に`RenderTargetHandle`へ包み、
/// 内部ロジックには生ポインタ演算を持ち込まない。

use std::ffi::c_void;
use std::ptr::NonNull;
use std::time::Instant;

/// 出力ピクセルフォーマット
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// BGRA 8bit/ch（D3D11系の標準スワップチェーンフォーマット）
    Bgra8,
    /// BGRA 8bit/ch sRGB
    Bgra8Srgb,
    /// RGBA 8bit/ch（Vulkan系でよく使われる）
    Rgba8,
    /// RGBA 8bit/ch sRGB
    Rgba8Srgb,
}

impl PixelFormat {
    /// 1ピクセルあたりのバイト数
    pub fn bytes_per_pixel(&self) -> u32 {
        // 現状サポートするのは32bitフォーマットのみ
        4
    }

    /// ABI境界へ渡す安定した整数コード
    pub fn abi_code(&self) -> i32 {
        match self {
            Self::Bgra8 => 0,
            Self::Bgra8Srgb => 1,
            Self::Rgba8 => 2,
            Self::Rgba8Srgb => 3,
        }
    }
}

/// レンダーターゲットの記述（サイズ + フォーマット）
///
/// バックエンドアダプタがハンドルから取得し、転送リソースの
/// 確保・再利用判定（ウィンドウリサイズ検出）に使用する。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl TargetDesc {
    /// 新しいTargetDescを作成
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self { width, height, format }
    }

    /// タイトに詰めた場合の1行のバイト数
    pub fn tight_stride(&self) -> u32 {
        self.width * self.format.bytes_per_pixel()
    }

    /// タイトに詰めた場合の全体バイト数
    pub fn byte_size(&self) -> usize {
        self.tight_stride() as usize * self.height as usize
    }
}

/// レンダーターゲットへの非所有ハンドル
///
/// ホストエンジンが毎フレーム供給するネイティブハンドルのラッパー。
/// ホストはフレーム表示後すぐにリソースを破棄・再利用しうるため、
/// 1回の転送発行を超えて保持してはならない。
#[derive(Debug, Clone, Copy)]
pub struct RenderTargetHandle(NonNull<c_void>);

impl RenderTargetHandle {
    /// 生ポインタからハンドルを作成
    ///
    /// # Returns
    /// - `Some(handle)`: 非nullポインタ
    /// - `None`: nullポインタ（呼び出し側でログ + no-op）
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// バックエンドAPIへ渡す生ポインタを取得
    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }
}

// ハンドルはレンダースレッド上でのみ使用される契約（ホスト側が保証）。
// グローバルコンテキストに格納するためSendを実装する。
unsafe impl Send for RenderTargetHandle {}

/// キャプチャ済みフレームのメタデータ
#[derive(Debug, Clone, Copy)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// 1行のバイト数。バックエンドによってはタイト幅より大きいことがある
    pub row_stride: u32,
    /// 単調増加するフレーム通し番号
    pub sequence: u64,
    /// コピー発行時刻（= フレーム内容が最新だった時点）
    pub captured_at: Instant,
}

/// キャプチャ済みフレーム
///
/// CPUアクセス可能なピクセルバッファとメタデータの組。
/// Frame Readback Engineから配送シンクへ所有権ごと移動し、
/// 以後レンダースレッドは一切触れない。
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    pub meta: FrameMetadata,
}

impl CapturedFrame {
    /// 新しいフレームを作成
    pub fn new(data: Vec<u8>, meta: FrameMetadata) -> Self {
        Self { data, meta }
    }

    /// データ長がメタデータと整合しているか
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.meta.row_stride as usize * self.meta.height as usize
    }
}

/// 検出されたグラフィックスバックエンドの種類
///
/// プラグインロード時に一度だけ決定され、以後不変。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Vulkan（IUnityGraphicsVulkan経由）
    Vulkan,
    /// Direct3D 11（IUnityGraphicsD3D11経由、Windowsのみ）
    D3d11,
    /// テスト用モックバックエンド
    Mock,
}

// UnityGfxRenderer値からの判定はInfrastructure層
// (infrastructure::backend::detect_backend_kind) が担当する。
