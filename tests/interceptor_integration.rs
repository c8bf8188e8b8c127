//! インターセプタ統合テスト
//!
//! モックバックエンドでSet-Buffer / Issue-Eventの2呼び出しプロトコルを
//! 駆動し、パイプライン全体（読み戻しリング → 配送スレッド → コンシューマ）の
//! 観測可能な性質を検証する。

use std::ffi::c_void;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use ::RenderingInterceptor::application::interceptor::{RenderingInterceptor, CAPTURE_EVENT_ID};
use ::RenderingInterceptor::domain::{
    BackendKind, CapturedFrame, FrameConsumerPort, GraphicsBackendPort, InterceptorConfig,
    InterceptorResult, RenderTargetHandle, TargetDesc,
};
use ::RenderingInterceptor::infrastructure::backend::mock::{
    MockBackendAdapter, MockFailure, ReleaseEvent,
};

/// 受信フレームをチャネルへ流すコンシューマ
struct ChannelConsumer {
    tx: mpsc::Sender<CapturedFrame>,
}

impl FrameConsumerPort for ChannelConsumer {
    fn consume(&mut self, frame: CapturedFrame) {
        let _ = self.tx.send(frame);
    }
}

/// ゲートが開くまで各フレームの処理をブロックするコンシューマ（低速消費の再現）
struct GatedConsumer {
    gate: mpsc::Receiver<()>,
    tx: mpsc::Sender<CapturedFrame>,
}

impl FrameConsumerPort for GatedConsumer {
    fn consume(&mut self, frame: CapturedFrame) {
        // ゲート送信側がdropされたら即座に通過する
        let _ = self.gate.recv();
        let _ = self.tx.send(frame);
    }
}

/// モックをテスト側と共有するためのラッパー
///
/// インターセプタ構築後もターゲットの解像度やピクセル内容を
/// 書き換えられるようにする。
struct SharedBackend(Arc<Mutex<MockBackendAdapter>>);

impl GraphicsBackendPort for SharedBackend {
    fn describe_target(&mut self, handle: &RenderTargetHandle) -> InterceptorResult<TargetDesc> {
        self.0.lock().unwrap().describe_target(handle)
    }
    fn issue_copy(
        &mut self,
        handle: &RenderTargetHandle,
        slot: usize,
        desc: &TargetDesc,
    ) -> InterceptorResult<()> {
        self.0.lock().unwrap().issue_copy(handle, slot, desc)
    }
    fn poll_completion(&mut self, slot: usize) -> InterceptorResult<bool> {
        self.0.lock().unwrap().poll_completion(slot)
    }
    fn map_result(&mut self, slot: usize) -> InterceptorResult<(Vec<u8>, u32)> {
        self.0.lock().unwrap().map_result(slot)
    }
    fn release_slot(&mut self, slot: usize) {
        self.0.lock().unwrap().release_slot(slot)
    }
    fn kind(&self) -> BackendKind {
        self.0.lock().unwrap().kind()
    }
}

fn config(ring_depth: usize, timeout_frames: u32, queue_depth: usize) -> InterceptorConfig {
    let mut config = InterceptorConfig::default();
    config.readback.ring_depth = ring_depth;
    config.readback.copy_timeout_frames = timeout_frames;
    config.delivery.queue_depth = queue_depth;
    config
}

fn handle(token: &mut u8) -> RenderTargetHandle {
    RenderTargetHandle::from_raw(token as *mut u8 as *mut c_void).expect("non-null")
}

/// Set-Buffer → Issue-Eventの1フレーム分を駆動
fn drive_frame<B: GraphicsBackendPort>(
    interceptor: &mut RenderingInterceptor<B>,
    token: &mut u8,
) {
    interceptor.set_render_buffer(Some(handle(token)));
    interceptor.handle_event(CAPTURE_EVENT_ID);
}

#[test]
fn test_frames_are_delivered_in_order_one_behind() {
    let mut token = 0u8;
    let mut mock = MockBackendAdapter::new(4, 4, 3);
    mock.set_latency_frames(0);

    let (tx, rx) = mpsc::channel();
    let mut interceptor =
        RenderingInterceptor::new(mock, &config(3, 8, 4), Box::new(ChannelConsumer { tx }));

    const EVENTS: usize = 10;
    for _ in 0..EVENTS {
        drive_frame(&mut interceptor, &mut token);
    }
    interceptor.shutdown();

    let sequences: Vec<u64> = rx.try_iter().map(|f| f.meta.sequence).collect();
    // 出力は1フレーム遅れ: イベントN回に対して最大N-1枚
    assert!(!sequences.is_empty());
    assert!(sequences.len() <= EVENTS - 1);
    for pair in sequences.windows(2) {
        assert!(pair[0] < pair[1], "order violated: {:?}", sequences);
    }
}

#[test]
fn test_event_without_buffer_is_noop() {
    let mock = MockBackendAdapter::new(4, 4, 3);
    let (tx, rx) = mpsc::channel();
    let mut interceptor =
        RenderingInterceptor::new(mock, &config(3, 8, 2), Box::new(ChannelConsumer { tx }));

    // Set-Bufferなしのイベントはキャプチャを発行しない
    interceptor.handle_event(CAPTURE_EVENT_ID);
    interceptor.handle_event(CAPTURE_EVENT_ID);
    assert_eq!(interceptor.stats().issued(), 0);

    interceptor.shutdown();
    assert_eq!(rx.try_iter().count(), 0);
}

#[test]
fn test_null_buffer_registration_is_noop() {
    let mut token = 0u8;
    let mock = MockBackendAdapter::new(4, 4, 3);
    let (tx, rx) = mpsc::channel();
    let mut interceptor =
        RenderingInterceptor::new(mock, &config(3, 8, 2), Box::new(ChannelConsumer { tx }));

    // null登録はpendingを作らず、直後のイベントは何も発行しない
    interceptor.set_render_buffer(None);
    interceptor.handle_event(CAPTURE_EVENT_ID);
    assert_eq!(interceptor.stats().issued(), 0);

    // 有効なハンドルの登録をnullが打ち消すこともない
    interceptor.set_render_buffer(Some(handle(&mut token)));
    interceptor.set_render_buffer(None);
    interceptor.handle_event(CAPTURE_EVENT_ID);
    assert_eq!(interceptor.stats().issued(), 1);

    interceptor.shutdown();
    drop(rx);
}

#[test]
fn test_unknown_event_id_is_ignored() {
    let mut token = 0u8;
    let mock = MockBackendAdapter::new(4, 4, 3);
    let (tx, rx) = mpsc::channel();
    let mut interceptor =
        RenderingInterceptor::new(mock, &config(3, 8, 2), Box::new(ChannelConsumer { tx }));

    interceptor.set_render_buffer(Some(handle(&mut token)));
    interceptor.handle_event(99);
    assert_eq!(interceptor.stats().issued(), 0);

    // pendingは保持されたままなので、正しいIDで消費される
    interceptor.handle_event(CAPTURE_EVENT_ID);
    assert_eq!(interceptor.stats().issued(), 1);

    interceptor.shutdown();
    drop(rx);
}

#[test]
fn test_pixel_pattern_survives_pipeline() {
    let mut token = 0u8;
    let mut mock = MockBackendAdapter::new(2, 2, 3);
    mock.set_latency_frames(0);

    let pattern: Vec<u8> = (0u8..16).collect();
    mock.set_source_pixels(pattern.clone());

    let shared = Arc::new(Mutex::new(mock));
    let (tx, rx) = mpsc::channel();
    let mut interceptor = RenderingInterceptor::new(
        SharedBackend(Arc::clone(&shared)),
        &config(3, 8, 4),
        Box::new(ChannelConsumer { tx }),
    );

    drive_frame(&mut interceptor, &mut token);
    // 発行済みコピーはスナップショット。以降の描画内容は混入しない
    shared.lock().unwrap().set_source_pixels(vec![0xFF; 16]);
    drive_frame(&mut interceptor, &mut token);

    interceptor.shutdown();

    let frame = rx.try_iter().next().expect("one frame delivered");
    assert_eq!(frame.data, pattern);
    assert_eq!(frame.meta.width, 2);
    assert_eq!(frame.meta.height, 2);
    assert_eq!(frame.meta.row_stride, 8);
    assert_eq!(frame.meta.sequence, 0);
    assert!(frame.is_consistent());
}

#[test]
fn test_stalled_transfers_time_out_without_blocking() {
    let mut token = 0u8;
    let mut mock = MockBackendAdapter::new(4, 4, 2);
    // 決して完了しない転送
    mock.set_latency_frames(u32::MAX);
    let log = mock.release_log();

    let (tx, rx) = mpsc::channel();
    let mut interceptor =
        RenderingInterceptor::new(mock, &config(2, 3, 2), Box::new(ChannelConsumer { tx }));

    for _ in 0..12 {
        drive_frame(&mut interceptor, &mut token);
    }

    // フレームは1枚も完成しないが、タイムアウト破棄でリングは回り続ける
    assert!(interceptor.stats().issued() > 2);
    let slot_releases = log
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, ReleaseEvent::Slot(_)))
        .count();
    assert!(slot_releases >= 2, "expected timeout releases, got {}", slot_releases);

    interceptor.shutdown();
    assert_eq!(rx.try_iter().count(), 0);
}

#[test]
fn test_resize_discards_stale_in_flight() {
    let mut token = 0u8;
    let mut mock = MockBackendAdapter::new(2, 2, 3);
    mock.set_latency_frames(1);

    let shared = Arc::new(Mutex::new(mock));
    let (tx, rx) = mpsc::channel();
    let mut interceptor = RenderingInterceptor::new(
        SharedBackend(Arc::clone(&shared)),
        &config(3, 8, 8),
        Box::new(ChannelConsumer { tx }),
    );

    for _ in 0..4 {
        drive_frame(&mut interceptor, &mut token);
    }

    // ウィンドウリサイズ
    shared.lock().unwrap().resize_target(4, 4);
    for _ in 0..4 {
        drive_frame(&mut interceptor, &mut token);
    }

    interceptor.shutdown();

    let frames: Vec<CapturedFrame> = rx.try_iter().collect();
    assert!(!frames.is_empty());

    // リサイズ後に旧解像度のフレームが混入しないこと
    let first_resized = frames.iter().position(|f| f.meta.width == 4);
    if let Some(pos) = first_resized {
        for frame in &frames[pos..] {
            assert_eq!(frame.meta.width, 4);
            assert_eq!(frame.meta.height, 4);
        }
    }
    // 全フレームでメタデータとデータ長が一致すること
    for frame in &frames {
        assert!(frame.is_consistent());
    }
}

#[test]
fn test_slow_consumer_drops_newest_without_blocking_events() {
    let mut token = 0u8;
    let mut mock = MockBackendAdapter::new(4, 4, 3);
    mock.set_latency_frames(0);

    let (gate_tx, gate_rx) = mpsc::channel();
    let (tx, rx) = mpsc::channel();
    let mut interceptor = RenderingInterceptor::new(
        mock,
        &config(3, 8, 1),
        Box::new(GatedConsumer { gate: gate_rx, tx }),
    );

    // コンシューマはゲートで停止中。イベント駆動はブロックせず継続する
    for _ in 0..8 {
        drive_frame(&mut interceptor, &mut token);
    }
    assert!(
        interceptor.sink_dropped() >= 1,
        "full queue should drop newest frames"
    );

    // ゲートを開放してからシャットダウン（バックログは処理される）
    drop(gate_tx);
    interceptor.shutdown();

    let delivered = rx.try_iter().count();
    assert!(delivered >= 1);
    assert!(delivered < 7, "drops must reduce delivered count");
}

#[test]
fn test_transient_backend_errors_are_recovered() {
    let mut token = 0u8;
    let mut mock = MockBackendAdapter::new(4, 4, 3);
    mock.set_latency_frames(0);
    mock.fail_next_issue(MockFailure::InvalidHandle);

    let shared = Arc::new(Mutex::new(mock));
    let (tx, rx) = mpsc::channel();
    let mut interceptor = RenderingInterceptor::new(
        SharedBackend(Arc::clone(&shared)),
        &config(3, 8, 8),
        Box::new(ChannelConsumer { tx }),
    );

    // 1回目の発行は失敗するが、イベント処理はpanicせず継続する
    drive_frame(&mut interceptor, &mut token);
    for _ in 0..4 {
        drive_frame(&mut interceptor, &mut token);
    }

    // 2種類目のエラーも同様に回復する
    shared
        .lock()
        .unwrap()
        .fail_next_issue(MockFailure::UnsupportedFormat);
    for _ in 0..4 {
        drive_frame(&mut interceptor, &mut token);
    }

    interceptor.shutdown();
    assert!(rx.try_iter().count() >= 1, "capture must continue after errors");
}

#[test]
fn test_shutdown_releases_slots_before_device() {
    let mut token = 0u8;
    let mut mock = MockBackendAdapter::new(4, 4, 2);
    mock.set_latency_frames(u32::MAX);
    let log = mock.release_log();

    let (tx, rx) = mpsc::channel();
    let mut interceptor =
        RenderingInterceptor::new(mock, &config(2, 100, 2), Box::new(ChannelConsumer { tx }));

    // 2転送をin-flightのままにしてアンロード
    drive_frame(&mut interceptor, &mut token);
    drive_frame(&mut interceptor, &mut token);
    interceptor.shutdown();
    drop(rx);

    let events = log.lock().unwrap().clone();
    let device_pos = events
        .iter()
        .position(|e| *e == ReleaseEvent::Device)
        .expect("device released");
    let slot_count = events
        .iter()
        .filter(|e| matches!(e, ReleaseEvent::Slot(_)))
        .count();
    assert_eq!(slot_count, 2);
    // すべてのスロット解放はデバイス解放より前に起こる
    for (pos, event) in events.iter().enumerate() {
        if matches!(event, ReleaseEvent::Slot(_)) {
            assert!(pos < device_pos, "slot released after device: {:?}", events);
        }
    }
}
