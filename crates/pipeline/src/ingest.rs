//! Audio ingest and stream lifecycle
//!
//! One [`StreamIngest`] handle exists per active audio stream. The transport
//! reader pushes decoded frames into a bounded single-producer queue
//! (drop-oldest on overflow, realtime preference); a per-stream worker task
//! consumes frames, applies VAD and the hard duration bound, and emits
//! exactly one [`IngestEvent::StreamEnded`] when the stream finalizes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use voicehub_config::AudioConfig;
use voicehub_core::{AudioFrame, AudioSegment, SampleRate, SegmentBuffer, StreamId};

use crate::vad::{VadDecision, VadDetector, VadOptions};

/// Why a stream finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEndReason {
    /// Explicit `end_audio_stream` or binary sentinel
    Completed,
    /// VAD silence window elapsed
    VadTimeout,
    /// Hard duration bound hit
    MaxDuration,
    /// Session closed while the stream was active
    Cancelled,
}

impl StreamEndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamEndReason::Completed => "completed",
            StreamEndReason::VadTimeout => "vad_timeout",
            StreamEndReason::MaxDuration => "max_duration",
            StreamEndReason::Cancelled => "cancelled",
        }
    }
}

/// Events the ingest worker reports back to the session
#[derive(Debug)]
pub enum IngestEvent {
    StreamEnded {
        stream_id: StreamId,
        reason: StreamEndReason,
        /// `None` when the stream was cancelled or produced no audio
        segment: Option<AudioSegment>,
    },
}

/// Outcome of pushing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// Accepted, but the oldest queued frame was evicted
    DroppedOldest,
    /// Sequence number not strictly ascending; frame discarded
    OutOfOrder,
    /// Stream already finalized
    Ended,
}

/// Monotonic ingest counters, shared with the metrics layer
#[derive(Debug, Default)]
pub struct IngestStats {
    pub frames_accepted: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_out_of_order: AtomicU64,
}

/// Bounded SPSC frame queue with drop-oldest overflow policy
struct FrameQueue {
    frames: Mutex<VecDeque<AudioFrame>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl FrameQueue {
    fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Push a frame; returns true when the oldest frame had to be evicted
    fn push(&self, frame: AudioFrame) -> bool {
        let mut frames = self.frames.lock();
        let evicted = if frames.len() >= self.capacity {
            frames.pop_front();
            true
        } else {
            false
        };
        frames.push_back(frame);
        drop(frames);
        self.notify.notify_one();
        evicted
    }

    async fn pop(&self) -> Option<AudioFrame> {
        loop {
            if let Some(frame) = self.frames.lock().pop_front() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Handle for one active audio stream
pub struct StreamIngest {
    stream_id: StreamId,
    queue: Arc<FrameQueue>,
    stats: Arc<IngestStats>,
    /// Last accepted sequence number, -1 before the first frame
    last_sequence: AtomicI64,
    cancel_requested: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
}

impl StreamIngest {
    /// Open a stream and spawn its worker. The worker owns VAD state and the
    /// segment buffer and reports termination on `events`.
    pub fn spawn(
        stream_id: StreamId,
        config: &AudioConfig,
        vad: VadOptions,
        stats: Arc<IngestStats>,
        events: mpsc::Sender<IngestEvent>,
    ) -> Arc<Self> {
        let queue = Arc::new(FrameQueue::new(config.inbound_queue.max(1)));
        let ingest = Arc::new(Self {
            stream_id: stream_id.clone(),
            queue: queue.clone(),
            stats,
            last_sequence: AtomicI64::new(-1),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            ended: Arc::new(AtomicBool::new(false)),
        });

        let worker = StreamWorker {
            stream_id,
            queue,
            buffer: SegmentBuffer::new(SampleRate::Hz16000),
            vad: VadDetector::new(vad),
            max_duration: Duration::from_secs(config.max_stream_duration_secs),
            cancel_requested: ingest.cancel_requested.clone(),
            ended: ingest.ended.clone(),
            events,
        };
        tokio::spawn(worker.run());

        ingest
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn is_active(&self) -> bool {
        !self.ended.load(Ordering::Acquire)
    }

    /// Push one decoded frame. Sequence numbers must be strictly ascending;
    /// stale or duplicate frames are discarded and counted.
    pub fn push_frame(&self, frame: AudioFrame) -> PushOutcome {
        if !self.is_active() {
            return PushOutcome::Ended;
        }

        let seq = frame.sequence as i64;
        let last = self.last_sequence.load(Ordering::Acquire);
        if seq <= last {
            self.stats.frames_out_of_order.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                stream_id = %self.stream_id,
                sequence = frame.sequence,
                last_accepted = last,
                "Discarding out-of-order frame"
            );
            return PushOutcome::OutOfOrder;
        }
        self.last_sequence.store(seq, Ordering::Release);
        self.stats.frames_accepted.fetch_add(1, Ordering::Relaxed);

        if self.queue.push(frame) {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            PushOutcome::DroppedOldest
        } else {
            PushOutcome::Accepted
        }
    }

    /// Explicit end: the worker drains the queue and finalizes.
    pub fn end(&self) {
        self.queue.close();
    }

    /// Session close: discard the segment, report `Cancelled`.
    pub fn abort(&self) {
        self.cancel_requested.store(true, Ordering::Release);
        self.queue.close();
    }
}

struct StreamWorker {
    stream_id: StreamId,
    queue: Arc<FrameQueue>,
    buffer: SegmentBuffer,
    vad: VadDetector,
    max_duration: Duration,
    cancel_requested: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    events: mpsc::Sender<IngestEvent>,
}

impl StreamWorker {
    async fn run(mut self) {
        let deadline = tokio::time::Instant::now() + self.max_duration;

        let reason = loop {
            let frame = tokio::select! {
                frame = self.queue.pop() => frame,
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::info!(stream_id = %self.stream_id, "Stream hit max duration, force-finalizing");
                    break StreamEndReason::MaxDuration;
                }
            };

            let Some(frame) = frame else {
                // Queue closed: explicit end or cancel.
                if self.cancel_requested.load(Ordering::Acquire) {
                    break StreamEndReason::Cancelled;
                }
                break StreamEndReason::Completed;
            };

            self.buffer.push(&frame);

            if self.buffer.duration() >= self.max_duration {
                tracing::info!(
                    stream_id = %self.stream_id,
                    buffered_ms = self.buffer.duration().as_millis() as u64,
                    "Accumulated duration bound reached"
                );
                break StreamEndReason::MaxDuration;
            }

            if self.vad.process(&frame) == VadDecision::EndOfSpeech {
                tracing::debug!(stream_id = %self.stream_id, "VAD silence window elapsed");
                break StreamEndReason::VadTimeout;
            }
        };

        self.ended.store(true, Ordering::Release);

        let segment = match reason {
            StreamEndReason::Cancelled => None,
            _ => {
                let segment = self.buffer.finalize();
                if segment.is_empty() {
                    None
                } else {
                    Some(segment)
                }
            }
        };

        let _ = self
            .events
            .send(IngestEvent::StreamEnded {
                stream_id: self.stream_id,
                reason,
                segment,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AudioConfig {
        AudioConfig {
            max_stream_duration_secs: 30,
            inbound_queue: 4,
            vad_enabled: false,
            ..AudioConfig::default()
        }
    }

    fn frame(seq: u32) -> AudioFrame {
        AudioFrame::new(vec![0.1; 320], SampleRate::Hz16000, seq, seq as u64 * 20)
    }

    #[tokio::test]
    async fn test_explicit_end_produces_segment() {
        let (tx, mut rx) = mpsc::channel(4);
        let stats = Arc::new(IngestStats::default());
        let ingest = StreamIngest::spawn(
            StreamId::from("mic-1"),
            &test_config(),
            VadOptions::default(),
            stats,
            tx,
        );

        assert_eq!(ingest.push_frame(frame(0)), PushOutcome::Accepted);
        assert_eq!(ingest.push_frame(frame(1)), PushOutcome::Accepted);
        ingest.end();

        match rx.recv().await.unwrap() {
            IngestEvent::StreamEnded {
                stream_id,
                reason,
                segment,
            } => {
                assert_eq!(stream_id.as_str(), "mic-1");
                assert_eq!(reason, StreamEndReason::Completed);
                assert_eq!(segment.unwrap().samples.len(), 640);
            }
        }
    }

    #[tokio::test]
    async fn test_out_of_order_frames_rejected_and_counted() {
        let (tx, _rx) = mpsc::channel(4);
        let stats = Arc::new(IngestStats::default());
        let ingest = StreamIngest::spawn(
            StreamId::from("mic-1"),
            &test_config(),
            VadOptions::default(),
            stats.clone(),
            tx,
        );

        assert_eq!(ingest.push_frame(frame(5)), PushOutcome::Accepted);
        assert_eq!(ingest.push_frame(frame(5)), PushOutcome::OutOfOrder);
        assert_eq!(ingest.push_frame(frame(3)), PushOutcome::OutOfOrder);
        assert_eq!(ingest.push_frame(frame(6)), PushOutcome::Accepted);
        assert_eq!(stats.frames_out_of_order.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let (tx, mut rx) = mpsc::channel(4);
        let stats = Arc::new(IngestStats::default());
        let ingest = StreamIngest::spawn(
            StreamId::from("mic-1"),
            &test_config(),
            VadOptions::default(),
            stats.clone(),
            tx,
        );

        // Queue capacity is 4; the worker may drain concurrently, so push
        // well past the bound and only assert the drop counter moved.
        let mut saw_drop = false;
        for seq in 0..2000 {
            if ingest.push_frame(frame(seq)) == PushOutcome::DroppedOldest {
                saw_drop = true;
            }
        }
        assert!(saw_drop);
        assert!(stats.frames_dropped.load(Ordering::Relaxed) > 0);

        // Stream still finalizes normally afterwards.
        ingest.end();
        let IngestEvent::StreamEnded { reason, segment, .. } = rx.recv().await.unwrap();
        assert_eq!(reason, StreamEndReason::Completed);
        assert!(segment.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_force_finalizes() {
        let (tx, mut rx) = mpsc::channel(4);
        let stats = Arc::new(IngestStats::default());
        let config = AudioConfig {
            max_stream_duration_secs: 2,
            ..test_config()
        };
        let ingest = StreamIngest::spawn(
            StreamId::from("mic-1"),
            &config,
            VadOptions::default(),
            stats,
            tx,
        );
        ingest.push_frame(frame(0));

        tokio::time::advance(Duration::from_secs(3)).await;

        let IngestEvent::StreamEnded { reason, .. } = rx.recv().await.unwrap();
        assert_eq!(reason, StreamEndReason::MaxDuration);
        assert!(!ingest.is_active());
    }

    #[tokio::test]
    async fn test_abort_discards_segment() {
        let (tx, mut rx) = mpsc::channel(4);
        let stats = Arc::new(IngestStats::default());
        let ingest = StreamIngest::spawn(
            StreamId::from("mic-1"),
            &test_config(),
            VadOptions::default(),
            stats,
            tx,
        );
        ingest.push_frame(frame(0));
        ingest.abort();

        let IngestEvent::StreamEnded { reason, segment, .. } = rx.recv().await.unwrap();
        assert_eq!(reason, StreamEndReason::Cancelled);
        assert!(segment.is_none());
    }
}
