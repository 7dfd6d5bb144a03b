// 압축 작업 핸들 - 백그라운드 스레드, 진행률, 취소
// CompressJob: 호스트(C ABI 등)가 폴링으로 상태 확인, 작업 하나 = 스레드 하나

use crate::pipeline::capability::{
    AudioEncoder, ContainerWriter, MediaSource, OutputChunk, VideoEncoder,
};
use crate::pipeline::error::{CompressError, ErrorKind};
use crate::pipeline::events::{ChannelObserver, CompressEvent, CompressObserver, JobState, ProgressEvent};
use crate::pipeline::orchestrator::{CancelToken, Codecs, Compressor, JobResult};
use crossbeam_channel::Receiver;
use log::{error, info};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// 압축 작업 핸들
pub struct CompressJob {
    /// 진행률 (0~100)
    progress: Arc<AtomicU32>,
    cancel: CancelToken,
    /// 완료 플래그 (성공/실패/취소 모두)
    finished: Arc<AtomicBool>,
    /// 에러 (있으면 실패)
    error: Arc<Mutex<Option<CompressError>>>,
    result: Arc<Mutex<Option<JobResult>>>,
    handle: Option<JoinHandle<()>>,
}

/// 진행률을 atomic에 반영한 뒤 내부 observer로 전달
struct ProgressMirror<O> {
    progress: Arc<AtomicU32>,
    inner: O,
}

impl<O: CompressObserver> CompressObserver for ProgressMirror<O> {
    fn on_state(&mut self, state: JobState) {
        self.inner.on_state(state);
    }

    fn on_progress(&mut self, event: &ProgressEvent) {
        self.progress.store(u32::from(event.percent), Ordering::SeqCst);
        self.inner.on_progress(event);
    }

    fn on_status(&mut self, message: &str) {
        self.inner.on_status(message);
    }

    fn on_chunk(&mut self, chunk: &OutputChunk) {
        self.inner.on_chunk(chunk);
    }

    fn on_complete(&mut self, result: &JobResult) {
        self.inner.on_complete(result);
    }

    fn on_error(&mut self, error: &CompressError) {
        self.inner.on_error(error);
    }
}

impl CompressJob {
    /// 압축 시작 (백그라운드 스레드에서 실행)
    pub fn start<S, V, A, W>(compressor: Compressor, source: S, codecs: Codecs<V, A, W>) -> Self
    where
        S: MediaSource + Send + 'static,
        V: VideoEncoder + Send + 'static,
        A: AudioEncoder + Send + 'static,
        W: ContainerWriter + Send + 'static,
    {
        Self::spawn(compressor, source, codecs, ())
    }

    /// 이벤트 채널과 함께 시작 (진행률/상태/청크를 수신측에서 소비)
    pub fn start_with_events<S, V, A, W>(
        compressor: Compressor,
        source: S,
        codecs: Codecs<V, A, W>,
    ) -> (Self, Receiver<CompressEvent>)
    where
        S: MediaSource + Send + 'static,
        V: VideoEncoder + Send + 'static,
        A: AudioEncoder + Send + 'static,
        W: ContainerWriter + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let job = Self::spawn(compressor, source, codecs, ChannelObserver::new(tx));
        (job, rx)
    }

    fn spawn<S, V, A, W, O>(
        compressor: Compressor,
        mut source: S,
        codecs: Codecs<V, A, W>,
        observer: O,
    ) -> Self
    where
        S: MediaSource + Send + 'static,
        V: VideoEncoder + Send + 'static,
        A: AudioEncoder + Send + 'static,
        W: ContainerWriter + Send + 'static,
        O: CompressObserver + Send + 'static,
    {
        let progress = Arc::new(AtomicU32::new(0));
        let cancel = CancelToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let error: Arc<Mutex<Option<CompressError>>> = Arc::new(Mutex::new(None));
        let result: Arc<Mutex<Option<JobResult>>> = Arc::new(Mutex::new(None));

        let c = cancel.clone();
        let f = finished.clone();
        let e = error.clone();
        let r = result.clone();
        let mut observer = ProgressMirror { progress: progress.clone(), inner: observer };

        let handle = std::thread::spawn(move || {
            // 협력자 panic도 실패로 기록, finished는 항상 설정
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                compressor.compress(&mut source, codecs, &mut observer, &c)
            }))
            .unwrap_or_else(|payload| {
                let err = CompressError::WorkerPanicked(panic_message(payload.as_ref()));
                observer.on_state(JobState::Failed);
                observer.on_error(&err);
                Err(err)
            });

            match outcome {
                Ok(output) => {
                    info!("[JOB] 완료: {} bytes", output.size_bytes);
                    if let Ok(mut slot) = r.lock() {
                        *slot = Some(output);
                    }
                }
                Err(err) => {
                    error!("[JOB] 실패: {}", err);
                    if let Ok(mut slot) = e.lock() {
                        *slot = Some(err);
                    }
                }
            }
            f.store(true, Ordering::SeqCst);
        });

        Self {
            progress,
            cancel,
            finished,
            error,
            result,
            handle: Some(handle),
        }
    }

    /// 진행률 가져오기 (0~100)
    pub fn progress(&self) -> u32 {
        self.progress.load(Ordering::SeqCst)
    }

    /// 취소 요청 (다음 프레임/블록 경계에서 중단)
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 완료 여부
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// 에러 메시지 가져오기 (None이면 성공 또는 진행 중)
    pub fn error(&self) -> Option<String> {
        self.error
            .lock()
            .ok()
            .and_then(|e| e.as_ref().map(|err| err.to_string()))
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error
            .lock()
            .ok()
            .and_then(|e| e.as_ref().map(CompressError::kind))
    }

    /// 완료된 결과를 꺼냄 (한 번만 Some)
    pub fn take_result(&self) -> Option<JobResult> {
        self.result.lock().ok().and_then(|mut r| r.take())
    }

    /// 작업 스레드 종료까지 대기
    pub fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("[JOB] 작업 스레드 panic");
                self.finished.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// panic payload → 메시지
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::options::CompressOptions;
    use crate::pipeline::capability::{ContainerConfig, EncodedSample};
    use crate::pipeline::error::BoxError;
    use crate::pipeline::testing::*;
    use std::time::{Duration, Instant};

    /// 첫 샘플에서 panic하는 라이터
    struct PanickingWriter;

    impl ContainerWriter for PanickingWriter {
        fn configure(&mut self, _config: &ContainerConfig) -> Result<(), BoxError> {
            Ok(())
        }

        fn add_sample(&mut self, _sample: EncodedSample) -> Result<Vec<OutputChunk>, BoxError> {
            panic!("muxer state corrupted");
        }

        fn finalize(&mut self) -> Result<Vec<OutputChunk>, BoxError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_job_completes_in_background() {
        let p = probe();
        let source = FakeSource::silent(1.0, 320, 240, &p).with_audio(48_000, 2, 1.0);
        let mut job = CompressJob::start(Compressor::default(), source, fake_codecs(&p));

        job.wait();

        assert!(job.is_finished());
        assert_eq!(job.progress(), 100);
        assert!(job.error().is_none());
        assert!(job.error_kind().is_none());
        let result = job.take_result().unwrap();
        assert_eq!(result.size_bytes, result.artifact.len() as u64);
        assert!(job.take_result().is_none());
    }

    #[test]
    fn test_job_reports_source_error() {
        let p = probe();
        let mut job = CompressJob::start(Compressor::default(), FakeSource::corrupt(&p), fake_codecs(&p));

        job.wait();

        assert!(job.is_finished());
        assert_eq!(job.error_kind(), Some(ErrorKind::SourceUnreadable));
        assert!(job.error().unwrap().contains("moov atom not found"));
        assert!(job.take_result().is_none());
    }

    #[test]
    fn test_job_events_end_with_complete() {
        let p = probe();
        let source = FakeSource::silent(1.0, 320, 240, &p);
        let compressor = Compressor::new(CompressOptions::default().with_chunk_size(32));
        let (mut job, rx) = CompressJob::start_with_events(compressor, source, fake_codecs(&p));

        job.wait();
        let events: Vec<CompressEvent> = rx.try_iter().collect();

        assert_eq!(events.first(), Some(&CompressEvent::State(JobState::Initializing)));
        assert_eq!(events.last(), Some(&CompressEvent::State(JobState::Complete)));
        let chunk_bytes: usize = events
            .iter()
            .filter_map(|e| match e {
                CompressEvent::Chunk(c) => Some(c.data.len()),
                _ => None,
            })
            .sum();
        let size = events
            .iter()
            .find_map(|e| match e {
                CompressEvent::Complete { size_bytes, .. } => Some(*size_bytes),
                _ => None,
            })
            .unwrap();
        assert_eq!(chunk_bytes as u64, size);
    }

    #[test]
    fn test_job_cancel_reports_cancelled() {
        let p = probe();
        // 긴 소스 - 취소가 끝나기 전에 도달
        let source = FakeSource::silent(3600.0, 64, 64, &p);
        let mut job = CompressJob::start(Compressor::default(), source, fake_codecs(&p));

        job.cancel();
        job.wait();

        assert!(job.is_finished());
        assert_eq!(job.error_kind(), Some(ErrorKind::Cancelled));
        assert!(p.lock().unwrap().video_submissions.len() < 108_000);
    }

    #[test]
    fn test_job_panic_is_reported_without_wait() {
        let p = probe();
        let source = FakeSource::silent(1.0, 320, 240, &p);
        let codecs = Codecs {
            video: FakeVideoEncoder::new(&p),
            audio: FakeAudioEncoder::new(&p),
            writer: PanickingWriter,
        };
        let (mut job, rx) = CompressJob::start_with_events(Compressor::default(), source, codecs);

        // C ABI처럼 wait 없이 폴링
        let deadline = Instant::now() + Duration::from_secs(10);
        while !job.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(job.is_finished());
        assert_eq!(job.error_kind(), Some(ErrorKind::EncoderRuntimeError));
        assert!(job.error().unwrap().contains("muxer state corrupted"));
        assert!(job.take_result().is_none());

        job.wait();
        let events: Vec<CompressEvent> = rx.try_iter().collect();
        let errors = events
            .iter()
            .filter(|e| matches!(e, CompressEvent::Failed { .. }))
            .count();
        assert_eq!(errors, 1);
        assert_eq!(events.last().map(|e| matches!(e, CompressEvent::Failed { .. })), Some(true));
    }
}
