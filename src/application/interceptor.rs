//! インターセプタ制御モジュール
//!
//! Set-Buffer / Issue-Eventの2呼び出しで駆動される純リアクティブな
//! オーケストレータ。内部にループやスレッドを持たず、ホストの
//! レンダースレッドから同期的に呼び出されます。
//!
//! # 安全契約
//! キャプチャ側の障害がレンダリングへ波及することは許されない。
//! フレーム単位のエラーはすべてここでログ + フレーム破棄により回復し、
//! ホストへは決して伝播しない。

use crate::application::delivery::DeliverySink;
use crate::application::lifecycle::LifecycleState;
use crate::application::readback::ReadbackEngine;
use crate::application::stats::{StatKind, StatsCollector};
use crate::domain::{
    FrameConsumerPort, GraphicsBackendPort, InterceptorConfig, RenderTargetHandle,
};
use std::time::Instant;

/// キャプチャを実行するイベントID
///
/// ホスト側のグルーコード（`GL.IssuePluginEvent(rendering_event_ptr(), 1)`）と
/// 対応する規約。他のIDはno-op。
pub const CAPTURE_EVENT_ID: i32 = 1;

/// Rendering Interceptor本体
///
/// プロセス全体の可変状態（pendingスロット、状態機械、リング、シンク）を
/// 1つの所有されたコンテキストに集約する。FFI層がプラグインロード時に生成し、
/// アンロード時に`shutdown()`で破棄する。テストではモックバックエンドを
/// 注入して直接駆動できる。
pub struct RenderingInterceptor<B: GraphicsBackendPort> {
    lifecycle: LifecycleState,
    /// 次のイベント呼び出しで読み戻す対象（最大1件）
    ///
    /// Set-Bufferで設定され、イベントコールバックで消費される。
    /// ハンドルは1回の読み戻し発行を超えて保持されない。
    pending: Option<RenderTargetHandle>,
    engine: ReadbackEngine<B>,
    sink: DeliverySink,
    stats: StatsCollector,
}

impl<B: GraphicsBackendPort> RenderingInterceptor<B> {
    /// 新しいインターセプタを作成
    ///
    /// # Arguments
    /// - `backend`: 検出済みバックエンドのアダプタ
    /// - `config`: 検証済みの設定
    /// - `consumer`: フレームの引き渡し先
    pub fn new(
        backend: B,
        config: &InterceptorConfig,
        consumer: Box<dyn FrameConsumerPort>,
    ) -> Self {
        tracing::info!(
            backend = ?backend.kind(),
            ring_depth = config.readback.ring_depth,
            queue_depth = config.delivery.queue_depth,
            "RenderingInterceptor created"
        );

        let mut lifecycle = LifecycleState::new();
        lifecycle.on_backend_detected();

        Self {
            lifecycle,
            pending: None,
            engine: ReadbackEngine::new(
                backend,
                config.readback.ring_depth,
                config.readback.copy_timeout_frames,
            ),
            sink: DeliverySink::new(config.delivery.queue_depth, consumer),
            stats: StatsCollector::default(),
        }
    }

    /// Set-Bufferステップ: 今フレームのレンダーターゲットを受け取る
    ///
    /// 毎フレーム、対応するイベント発行より前にホストから呼び出される。
    /// `None`（nullポインタ）はログのみのno-op。前フレームのハンドルが
    /// 未消費の場合は上書きする（ハンドルは当該フレーム限りで失効するため、
    /// 古い方を読んでも安全ではない）。
    pub fn set_render_buffer(&mut self, handle: Option<RenderTargetHandle>) {
        match handle {
            Some(handle) => {
                if self.pending.is_some() {
                    tracing::debug!("Pending render buffer overwritten before consumption");
                    self.stats.record_dropped(1);
                }
                self.pending = Some(handle);
            }
            None => {
                tracing::warn!("set_render_buffer called with null pointer, ignoring");
            }
        }
    }

    /// Issue-Eventステップ: ホストのグラフィックスコマンドキューから呼び出される
    ///
    /// レンダースレッド上、カラーバッファ確定後・プレゼント前に実行される。
    /// pendingスロットが空の場合はno-op（初回フレームでSet-Bufferより先に
    /// イベントが届くレースをガードする）。
    pub fn handle_event(&mut self, event_id: i32) {
        if event_id != CAPTURE_EVENT_ID {
            tracing::debug!(event_id, "Ignoring unknown render event id");
            return;
        }

        // pendingなしはフォールトではなくno-op
        let Some(handle) = self.pending.take() else {
            tracing::debug!("Render event with no pending buffer, skipping");
            return;
        };

        if !self.lifecycle.begin_capture() {
            tracing::debug!("Interceptor not ready, skipping capture");
            return;
        }

        let output = self.engine.capture(&handle);
        // ハンドルはここで失効。以降保持しない

        self.stats.record_issue();
        self.stats
            .record_dropped((output.timed_out + output.discarded) as u64);
        if output.input_dropped {
            self.stats.record_dropped(1);
        }
        if let Some(error) = &output.error {
            // エラーはすべてログ + フレーム破棄で回復し、ホストへ伝播しない（安全契約）
            if error.is_per_frame() {
                tracing::warn!("Frame capture error (recovered): {}", error);
            } else {
                tracing::error!("Unexpected capture error (frame dropped): {}", error);
            }
        }

        if let Some(frame) = output.frame {
            let mapped_at = Instant::now();
            self.stats
                .record_duration(StatKind::Readback, mapped_at - frame.meta.captured_at);

            let issued_at = frame.meta.captured_at;
            if self.sink.submit(frame) {
                let now = Instant::now();
                self.stats.record_delivered();
                self.stats.record_duration(StatKind::Delivery, now - mapped_at);
                self.stats.record_duration(StatKind::EndToEnd, now - issued_at);
            } else {
                self.stats.record_dropped(1);
            }
        }

        if self.stats.should_report() {
            self.stats.report_and_reset();
        }

        self.lifecycle.end_capture();
    }

    /// 統計コレクターへの参照を取得（テスト・診断用）
    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    /// 配送シンクのドロップ数を取得（テスト・診断用）
    pub fn sink_dropped(&self) -> u64 {
        self.sink.dropped()
    }

    /// プラグインアンロード時の破棄処理
    ///
    /// 解放順序: in-flight転送の放棄（スロットリソース解放）→
    /// バックエンドのDrop（デバイスレベルのリソース解放）→
    /// 配送シンクの停止（バックログを処理しきってスレッドjoin）。
    pub fn shutdown(mut self) {
        self.pending = None;
        self.engine.shutdown();

        let issued = self.stats.issued();
        let delivered = self.stats.delivered();
        drop(self.engine);

        self.sink.shutdown();
        tracing::info!(issued, delivered, "RenderingInterceptor shut down");
    }
}
