//! Frame Delivery Sinkモジュール
//!
//! 完成したフレームを専用コンシューマスレッドへ引き渡し、キャプチャの
//! 周期と消費の周期を分離します。キューは有界で、コンシューマが遅い場合は
//! 最新フレームをドロップします（drop-newestポリシー）。メモリの無制限な
//! 増加や、遅いI/Oがレンダースレッドへ波及することを防ぎます。

use crate::domain::{CapturedFrame, FrameConsumerPort};
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::thread::JoinHandle;

/// フレーム配送シンク
///
/// `submit()`はレンダースレッドから呼び出され、決してブロックしない。
/// フレームの所有権はキュー経由でコンシューマスレッドへ完全に移動する。
pub struct DeliverySink {
    tx: Option<Sender<CapturedFrame>>,
    worker: Option<JoinHandle<()>>,
    /// 順序保証用: 最後に投入したシーケンス番号
    last_sequence: Option<u64>,
    submitted: u64,
    dropped: u64,
}

impl DeliverySink {
    /// 新しいDeliverySinkを作成し、コンシューマスレッドを起動
    ///
    /// # Arguments
    /// - `queue_depth`: 配送キューの深さ（1以上。設定検証済みの値を渡すこと）
    /// - `consumer`: 登録するコンシューマ（所有権ごとスレッドへ移動）
    pub fn new(queue_depth: usize, mut consumer: Box<dyn FrameConsumerPort>) -> Self {
        let (tx, rx) = bounded::<CapturedFrame>(queue_depth);

        let worker = std::thread::Builder::new()
            .name("frame-delivery".to_string())
            .spawn(move || {
                // 送信側がDropされるとrecvがErrを返しループを抜ける
                while let Ok(frame) = rx.recv() {
                    consumer.consume(frame);
                }
            })
            .expect("failed to spawn delivery thread");

        Self {
            tx: Some(tx),
            worker: Some(worker),
            last_sequence: None,
            submitted: 0,
            dropped: 0,
        }
    }

    /// フレームを配送キューへ投入（ノンブロッキング）
    ///
    /// # Returns
    /// キューに入った場合は true。満杯によるドロップ・順序違反の場合は false
    pub fn submit(&mut self, frame: CapturedFrame) -> bool {
        // シーケンスは厳密に増加していなければならない
        if let Some(last) = self.last_sequence {
            if frame.meta.sequence <= last {
                tracing::warn!(
                    sequence = frame.meta.sequence,
                    last_sequence = last,
                    "Out-of-order frame rejected"
                );
                self.dropped += 1;
                return false;
            }
        }

        let Some(tx) = &self.tx else {
            self.dropped += 1;
            return false;
        };

        let sequence = frame.meta.sequence;
        match tx.try_send(frame) {
            Ok(()) => {
                self.last_sequence = Some(sequence);
                self.submitted += 1;
                true
            }
            Err(TrySendError::Full(frame)) => {
                // キュー満杯: 最新フレームをドロップしてコンシューマにはバックログを
                // 処理させ続ける。レンダースレッドは決して待たない
                tracing::debug!(sequence = frame.meta.sequence, "Delivery queue full, frame dropped");
                self.dropped += 1;
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("Delivery consumer thread has terminated");
                self.dropped += 1;
                false
            }
        }
    }

    /// キュー投入に成功したフレーム数
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// ドロップしたフレーム数
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// キューを閉じ、コンシューマスレッドの終了を待つ
    ///
    /// キュー内の残存フレームはコンシューマがすべて処理してから終了する。
    pub fn shutdown(mut self) {
        self.close_and_join();
    }

    fn close_and_join(&mut self) {
        // Senderを落とすことでコンシューマ側のrecvループが終了する
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Delivery consumer thread panicked");
            }
        }
    }
}

impl Drop for DeliverySink {
    fn drop(&mut self) {
        self.close_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FrameMetadata, PixelFormat};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    fn frame(sequence: u64) -> CapturedFrame {
        CapturedFrame::new(
            vec![0u8; 16],
            FrameMetadata {
                width: 2,
                height: 2,
                format: PixelFormat::Rgba8,
                row_stride: 8,
                sequence,
                captured_at: Instant::now(),
            },
        )
    }

    /// 受信したシーケンスを記録するコンシューマ
    struct RecordingConsumer {
        seen: Arc<Mutex<Vec<u64>>>,
    }

    impl FrameConsumerPort for RecordingConsumer {
        fn consume(&mut self, frame: CapturedFrame) {
            self.seen.lock().unwrap().push(frame.meta.sequence);
        }
    }

    /// ゲート解放まで1フレームごとにブロックするコンシューマ
    ///
    /// タイミング依存を避け、決定的にキュー満杯状態を作るために使用する。
    struct GatedConsumer {
        gate: mpsc::Receiver<()>,
        seen: Arc<Mutex<Vec<u64>>>,
    }

    impl FrameConsumerPort for GatedConsumer {
        fn consume(&mut self, frame: CapturedFrame) {
            self.seen.lock().unwrap().push(frame.meta.sequence);
            let _ = self.gate.recv();
        }
    }

    #[test]
    fn test_frames_reach_consumer_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut sink = DeliverySink::new(4, Box::new(RecordingConsumer { seen: seen.clone() }));

        for seq in 0..4 {
            assert!(sink.submit(frame(seq)));
        }
        sink.shutdown();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_full_queue_drops_newest() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (gate_tx, gate_rx) = mpsc::channel();
        let mut sink = DeliverySink::new(
            1,
            Box::new(GatedConsumer {
                gate: gate_rx,
                seen: seen.clone(),
            }),
        );

        // 1枚目はコンシューマへ渡り、ゲートでブロックされる
        assert!(sink.submit(frame(0)));
        // コンシューマが1枚目を取り出すのを待ってからキューを埋める
        while seen.lock().unwrap().is_empty() {
            std::thread::yield_now();
        }
        assert!(sink.submit(frame(1)));

        // キュー(深さ1)が満杯なので以降はドロップされる
        let mut dropped_any = false;
        for seq in 2..10 {
            if !sink.submit(frame(seq)) {
                dropped_any = true;
            }
        }
        assert!(dropped_any);
        assert!(sink.dropped() > 0);
        // 有界性: 投入成功数はブロック中の1枚 + キュー深さ1を超えない
        assert!(sink.submitted() <= 2);

        // ゲートを開放して全フレームを流しきる
        for _ in 0..10 {
            let _ = gate_tx.send(());
        }
        sink.shutdown();

        let seen = seen.lock().unwrap();
        for pair in seen.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_out_of_order_frame_rejected() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut sink = DeliverySink::new(8, Box::new(RecordingConsumer { seen: seen.clone() }));

        assert!(sink.submit(frame(5)));
        assert!(!sink.submit(frame(5)));
        assert!(!sink.submit(frame(3)));
        assert!(sink.submit(frame(6)));

        sink.shutdown();
        assert_eq!(*seen.lock().unwrap(), vec![5, 6]);
    }

    #[test]
    fn test_shutdown_drains_backlog() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut sink = DeliverySink::new(8, Box::new(RecordingConsumer { seen: seen.clone() }));

        for seq in 0..8 {
            sink.submit(frame(seq));
        }
        sink.shutdown();

        // shutdownはキュー内の残存フレームを処理しきってから戻る
        assert_eq!(seen.lock().unwrap().len(), 8);
    }
}
