// 작업 이벤트 - 상태 전이, 진행률, 상태 메시지, 출력 청크, 완료/실패
// 콜백 대신 Observer trait (기본 no-op) + 채널 구현

use crate::pipeline::capability::OutputChunk;
use crate::pipeline::error::{CompressError, ErrorKind};
use crate::pipeline::orchestrator::JobResult;
use crossbeam_channel::Sender;
use std::fmt;
use std::time::Duration;

/// 작업 상태 머신
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Initializing,
    EncodingVideo,
    EncodingAudio,
    Finalizing,
    Complete,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 진행률 이벤트 (0~100)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub percent: u8,
    pub message: String,
}

/// 작업 이벤트 수신자 - 필요한 훅만 구현
pub trait CompressObserver {
    fn on_state(&mut self, _state: JobState) {}
    fn on_progress(&mut self, _event: &ProgressEvent) {}
    fn on_status(&mut self, _message: &str) {}
    fn on_chunk(&mut self, _chunk: &OutputChunk) {}
    fn on_complete(&mut self, _result: &JobResult) {}
    fn on_error(&mut self, _error: &CompressError) {}
}

/// 아무것도 하지 않는 observer
impl CompressObserver for () {}

impl<T: CompressObserver + ?Sized> CompressObserver for &mut T {
    fn on_state(&mut self, state: JobState) {
        (**self).on_state(state)
    }
    fn on_progress(&mut self, event: &ProgressEvent) {
        (**self).on_progress(event)
    }
    fn on_status(&mut self, message: &str) {
        (**self).on_status(message)
    }
    fn on_chunk(&mut self, chunk: &OutputChunk) {
        (**self).on_chunk(chunk)
    }
    fn on_complete(&mut self, result: &JobResult) {
        (**self).on_complete(result)
    }
    fn on_error(&mut self, error: &CompressError) {
        (**self).on_error(error)
    }
}

/// 채널로 전달되는 이벤트 (소유 데이터)
#[derive(Debug, Clone, PartialEq)]
pub enum CompressEvent {
    State(JobState),
    Progress(ProgressEvent),
    Status(String),
    Chunk(OutputChunk),
    Complete { size_bytes: u64, elapsed: Duration },
    Failed { kind: ErrorKind, message: String },
}

/// crossbeam 채널 observer (수신측이 닫혀도 작업은 계속)
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<CompressEvent>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<CompressEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: CompressEvent) {
        let _ = self.tx.send(event);
    }
}

impl CompressObserver for ChannelObserver {
    fn on_state(&mut self, state: JobState) {
        self.send(CompressEvent::State(state));
    }

    fn on_progress(&mut self, event: &ProgressEvent) {
        self.send(CompressEvent::Progress(event.clone()));
    }

    fn on_status(&mut self, message: &str) {
        self.send(CompressEvent::Status(message.to_string()));
    }

    fn on_chunk(&mut self, chunk: &OutputChunk) {
        self.send(CompressEvent::Chunk(chunk.clone()));
    }

    fn on_complete(&mut self, result: &JobResult) {
        self.send(CompressEvent::Complete {
            size_bytes: result.size_bytes,
            elapsed: result.elapsed,
        });
    }

    fn on_error(&mut self, error: &CompressError) {
        self.send(CompressEvent::Failed {
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}

/// 진행률 단조 증가 + 100 클램프
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 보고할 값 계산: [last, 100] 범위로 보정
    pub fn advance(&mut self, percent: u32) -> u8 {
        let clamped = percent.min(100) as u8;
        self.last = self.last.max(clamped);
        self.last
    }

    pub fn current(&self) -> u8 {
        self.last
    }
}

/// 비디오 단계 진행률: round((i+1)/total × 70)
pub fn video_progress(frames_done: u64, total_frames: u64) -> u32 {
    if total_frames == 0 {
        return VIDEO_SHARE;
    }
    (frames_done as f64 / total_frames as f64 * f64::from(VIDEO_SHARE)).round() as u32
}

/// 오디오 단계 진행률: 70 + round(processed/total × 30), 최대 100
pub fn audio_progress(samples_done: usize, total_samples: usize) -> u32 {
    if total_samples == 0 {
        return 100;
    }
    let share = (samples_done as f64 / total_samples as f64 * f64::from(AUDIO_SHARE)).round() as u32;
    (VIDEO_SHARE + share).min(100)
}

/// 비디오 단계가 차지하는 비율
pub const VIDEO_SHARE: u32 = 70;
/// 오디오 단계가 차지하는 비율
pub const AUDIO_SHARE: u32 = 30;
