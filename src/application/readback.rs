//! Frame Readback Engineモジュール
//!
//! GPU→CPU転送をin-flightリングで多重化し、コピーの発行が過去のマップを
//! 待たないようにします。出力は意図的に入力より1フレーム遅れます。
//! 同期読み戻しはGPUとCPUを直列化しレンダースループットを破壊するため、
//! このレイテンシは設計上のトレードオフです。

use crate::domain::{
    CapturedFrame, FrameMetadata, GraphicsBackendPort, InterceptorError, RenderTargetHandle,
    TargetDesc,
};
use std::time::Instant;

/// in-flight転送のスロット状態
#[derive(Debug, Clone)]
struct InFlight {
    /// フレーム通し番号（発行順、単調増加）
    sequence: u64,
    /// 発行時点のターゲット記述
    desc: TargetDesc,
    /// コピー発行時刻
    issued_at: Instant,
    /// 発行後に経過したイベント回数
    age_frames: u32,
}

/// 1回のイベント処理の結果
///
/// レンダースレッド上で動作するため、エラーもこの構造体で返し
/// 呼び出し側がログ + フレーム破棄で回復する（panicや伝播はしない）。
#[derive(Debug, Default)]
pub struct CaptureOutput {
    /// 完成したフレーム（1イベントにつき最大1枚、発行順）
    pub frame: Option<CapturedFrame>,
    /// このイベントでタイムアウト破棄された転送数
    pub timed_out: u32,
    /// ターゲット変更（リサイズ等）で破棄された転送数
    pub discarded: u32,
    /// リング満杯で今フレームの発行を断念したか
    pub input_dropped: bool,
    /// フレーム単位のエラー（ログ用。発生してもエンジンは継続可能）
    pub error: Option<InterceptorError>,
}

/// Frame Readback Engine
///
/// copy-then-mapシーケンスをスロットリングで駆動する。
/// `capture()`はイベント1回につき1回、レンダースレッドから呼び出される。
pub struct ReadbackEngine<B: GraphicsBackendPort> {
    backend: B,
    slots: Vec<Option<InFlight>>,
    next_sequence: u64,
    timeout_frames: u32,
    /// 直近に観測したターゲット記述（変更検出用）
    current_desc: Option<TargetDesc>,
}

impl<B: GraphicsBackendPort> ReadbackEngine<B> {
    /// 新しいReadbackEngineを作成
    ///
    /// # Arguments
    /// - `backend`: グラフィックスバックエンドアダプタ
    /// - `ring_depth`: in-flightリングの深さ（2以上。設定検証済みの値を渡すこと）
    /// - `timeout_frames`: コピー完了を待つ上限イベント数
    pub fn new(backend: B, ring_depth: usize, timeout_frames: u32) -> Self {
        Self {
            backend,
            slots: (0..ring_depth).map(|_| None).collect(),
            next_sequence: 0,
            timeout_frames,
            current_desc: None,
        }
    }

    /// 1イベント分のキャプチャ処理を実行
    ///
    /// 処理順序:
    /// 1. in-flight転送のエージングとタイムアウト破棄
    /// 2. 最古の完了済み転送のマップ（= 前フレームのピクセルを産出）
    /// 3. ターゲット変更の検出（変更時はin-flightを破棄しリソースを作り直す）
    /// 4. 今フレームのコピー発行
    pub fn capture(&mut self, handle: &RenderTargetHandle) -> CaptureOutput {
        let mut out = CaptureOutput::default();

        self.age_slots();
        self.expire_timeouts(&mut out);
        self.harvest_oldest(&mut out);
        self.issue(handle, &mut out);

        out
    }

    /// in-flight転送数を取得
    pub fn in_flight_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// 発行済みシーケンス数を取得
    pub fn issued_sequences(&self) -> u64 {
        self.next_sequence
    }

    /// すべてのin-flight転送を放棄し、バックエンドのスロットリソースを解放
    ///
    /// プラグインアンロード時に呼び出す。スロット解放後にバックエンド自体が
    /// Dropされることで、リソース解放順序（スロット→デバイス）が保証される。
    pub fn shutdown(&mut self) {
        for idx in 0..self.slots.len() {
            if self.slots[idx].take().is_some() {
                self.backend.release_slot(idx);
            }
        }
    }

    fn age_slots(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.age_frames += 1;
        }
    }

    /// タイムアウトした未完了転送を破棄
    fn expire_timeouts(&mut self, out: &mut CaptureOutput) {
        for idx in 0..self.slots.len() {
            let expired = match &self.slots[idx] {
                Some(f) if f.age_frames >= self.timeout_frames => {
                    // 規定フレーム数を超えていても完了済みならharvestに回す
                    !matches!(self.backend.poll_completion(idx), Ok(true))
                }
                _ => false,
            };

            if expired {
                let flight = self.slots[idx].take().expect("slot checked above");
                self.backend.release_slot(idx);
                out.timed_out += 1;

                let error = InterceptorError::TransferTimeout {
                    sequence: flight.sequence,
                    frames: flight.age_frames,
                };
                tracing::warn!("{}", error);
                out.error = Some(error);
            }
        }
    }

    /// 最古の完了済み転送をマップしてフレームを産出
    fn harvest_oldest(&mut self, out: &mut CaptureOutput) {
        // 順序保証のため、最古のin-flightのみを対象とする。
        // 最古が未完了なら、より新しい転送が完了していても待つ。
        let oldest = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, s)| s.as_ref().map(|f| (idx, f.sequence)))
            .min_by_key(|&(_, seq)| seq)
            .map(|(idx, _)| idx);

        let Some(idx) = oldest else {
            return;
        };

        match self.backend.poll_completion(idx) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                self.slots[idx] = None;
                self.backend.release_slot(idx);
                tracing::warn!("Completion poll failed: {}", e);
                out.error = Some(e);
                return;
            }
        }

        let flight = self.slots[idx].take().expect("oldest slot exists");
        match self.backend.map_result(idx) {
            Ok((data, row_stride)) => {
                let meta = FrameMetadata {
                    width: flight.desc.width,
                    height: flight.desc.height,
                    format: flight.desc.format,
                    row_stride,
                    sequence: flight.sequence,
                    captured_at: flight.issued_at,
                };
                out.frame = Some(CapturedFrame::new(data, meta));
            }
            Err(e) => {
                self.backend.release_slot(idx);
                tracing::warn!("Map failed for frame {}: {}", flight.sequence, e);
                out.error = Some(e);
            }
        }
    }

    /// 今フレームのコピーを発行
    fn issue(&mut self, handle: &RenderTargetHandle, out: &mut CaptureOutput) {
        let desc = match self.backend.describe_target(handle) {
            Ok(desc) => desc,
            Err(e) => {
                tracing::warn!("Target description failed: {}", e);
                out.error = Some(e);
                return;
            }
        };

        // リサイズ・フォーマット変更の検出。古いターゲットはホスト側で
        // 破棄されている可能性があるため、in-flightは破棄して作り直す
        if self.current_desc.is_some() && self.current_desc != Some(desc) {
            for idx in 0..self.slots.len() {
                if self.slots[idx].take().is_some() {
                    self.backend.release_slot(idx);
                    out.discarded += 1;
                }
            }
            tracing::info!(
                width = desc.width,
                height = desc.height,
                "Render target changed, transfer resources will be reallocated"
            );
        }
        self.current_desc = Some(desc);

        let Some(free_idx) = self.slots.iter().position(|s| s.is_none()) else {
            // リング満杯: GPUが大きく遅延している。入力フレームをドロップして継続
            tracing::debug!("In-flight ring full, dropping input frame");
            out.input_dropped = true;
            return;
        };

        match self.backend.issue_copy(handle, free_idx, &desc) {
            Ok(()) => {
                self.slots[free_idx] = Some(InFlight {
                    sequence: self.next_sequence,
                    desc,
                    issued_at: Instant::now(),
                    age_frames: 0,
                });
                self.next_sequence += 1;
            }
            Err(e) => {
                tracing::warn!("Copy issue failed: {}", e);
                out.error = Some(e);
            }
        }
    }
}
