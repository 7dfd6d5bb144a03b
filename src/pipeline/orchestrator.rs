// 압축 오케스트레이터 - 상태 머신 + 프레임 샘플링 루프 + 오디오 블록 인코딩
// Idle → Initializing → EncodingVideo → (EncodingAudio) → Finalizing → Complete / Failed

use crate::pipeline::capability::{
    AudioBlock, AudioEncoder, AudioEncoderConfig, AudioTrack, AudioTrackConfig, ContainerConfig,
    ContainerWriter, EncodedSample, MediaSource, OutputChunk, VideoEncoder, VideoEncoderConfig,
    VideoTrackConfig,
};
use crate::pipeline::error::{CompressError, Stage};
use crate::pipeline::events::{
    audio_progress, video_progress, CompressObserver, JobState, ProgressEvent, ProgressTracker,
    VIDEO_SHARE,
};
use crate::pipeline::options::{
    CompressOptions, AUDIO_BITRATE_BPS, AUDIO_BLOCK_FRAMES, AUDIO_CODEC, VIDEO_CODEC,
};
use crate::pipeline::resolution::{self, Geometry};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MSG_STARTING: &str = "Starting compression...";
const MSG_AUDIO_UNAVAILABLE: &str = "Audio decoding failed or no audio track found.";
const MSG_MUXER_CREATED: &str = "Muxer created.";
const MSG_NO_AUDIO: &str = "No audio track detected; skipping audio encoding.";
const MSG_SKIPPING_AUDIO: &str = "Skipping audio encoding.";
const MSG_FINALIZING: &str = "Finalizing MP4 file...";
const MSG_COMPLETE: &str = "Compression complete!";

/// 협조적 취소 토큰 (복제본끼리 플래그 공유)
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 완료된 압축 결과
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    /// 재조립된 MP4 바이트
    pub artifact: Vec<u8>,
    pub elapsed: Duration,
    pub size_bytes: u64,
}

impl JobResult {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// 작업 하나가 소유하는 인코더/먹서 묶음
pub struct Codecs<V, A, W> {
    pub video: V,
    pub audio: A,
    pub writer: W,
}

/// 압축 실행기 (설정만 보관, 작업마다 compress 호출)
#[derive(Debug, Clone, Default)]
pub struct Compressor {
    options: CompressOptions,
}

impl Compressor {
    pub fn new(options: CompressOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompressOptions {
        &self.options
    }

    /// 소스를 끝까지 압축. 실패/취소 시 observer.on_error가 정확히 한 번 호출됨
    pub fn compress<S, V, A, W, O>(
        &self,
        source: &mut S,
        codecs: Codecs<V, A, W>,
        observer: &mut O,
        cancel: &CancelToken,
    ) -> Result<JobResult, CompressError>
    where
        S: MediaSource + ?Sized,
        V: VideoEncoder,
        A: AudioEncoder,
        W: ContainerWriter,
        O: CompressObserver + ?Sized,
    {
        let mut job = Job::new(&self.options, observer, cancel);
        match job.run(source, codecs) {
            Ok(result) => Ok(result),
            Err(err) => {
                job.fail(&err);
                Err(err)
            }
        }
    }
}

/// 프레임 i의 presentation timestamp (μs)
pub fn frame_timestamp_us(frame_index: u64, frame_rate: f64) -> i64 {
    (frame_index as f64 * 1_000_000.0 / frame_rate).round() as i64
}

/// 누적 샘플 수 → 오디오 블록 timestamp (μs)
pub fn audio_timestamp_us(samples_so_far: usize, sample_rate: u32) -> i64 {
    (samples_so_far as f64 / f64::from(sample_rate) * 1_000_000.0).round() as i64
}

/// 첫 오디오 출력 timestamp를 0으로 맞춤 (인코더 priming 보정)
#[derive(Debug, Default)]
pub(crate) struct TimestampRebaser {
    first_us: Option<i64>,
}

impl TimestampRebaser {
    pub(crate) fn rebase(&mut self, sample: EncodedSample) -> EncodedSample {
        let first = *self.first_us.get_or_insert(sample.timestamp_us);
        sample.rebased(first)
    }
}

/// 실행 중 작업 상태
struct Job<'a, O: ?Sized> {
    options: &'a CompressOptions,
    observer: &'a mut O,
    cancel: &'a CancelToken,
    state: JobState,
    tracker: ProgressTracker,
    chunks: Vec<OutputChunk>,
    /// 지금까지 받은 청크의 끝 offset
    received: u64,
    started: Instant,
}

impl<'a, O: CompressObserver + ?Sized> Job<'a, O> {
    fn new(options: &'a CompressOptions, observer: &'a mut O, cancel: &'a CancelToken) -> Self {
        Self {
            options,
            observer,
            cancel,
            state: JobState::Idle,
            tracker: ProgressTracker::new(),
            chunks: Vec::new(),
            received: 0,
            started: Instant::now(),
        }
    }

    fn run<S, V, A, W>(
        &mut self,
        source: &mut S,
        codecs: Codecs<V, A, W>,
    ) -> Result<JobResult, CompressError>
    where
        S: MediaSource + ?Sized,
        V: VideoEncoder,
        A: AudioEncoder,
        W: ContainerWriter,
    {
        let Codecs { video: mut video_encoder, audio: mut audio_encoder, mut writer } = codecs;
        self.options.validate()?;

        // 1. 초기화
        self.transition(JobState::Initializing);
        self.progress(0, MSG_STARTING);
        self.status(MSG_STARTING);

        let metadata = source.metadata().map_err(CompressError::SourceUnreadable)?;
        let geometry = resolution::plan(metadata.width, metadata.height, self.options.tier);
        let total_frames = metadata.frame_count(self.options.frame_rate);
        info!(
            "[COMPRESS] 시작: {}x{} → {} ({}), {}fps, {}bps, 총 {}프레임",
            metadata.width,
            metadata.height,
            geometry,
            self.options.tier,
            self.options.frame_rate,
            self.options.bitrate_bps,
            total_frames
        );
        self.status(&format!("Target resolution: {}", geometry));

        // 2. 오디오 선디코딩 (실패해도 비디오만으로 진행)
        let audio = match source.decode_audio() {
            Ok(track) if track.frame_count() > 0 => {
                info!(
                    "[COMPRESS] 오디오: {}Hz, {}ch, {:.2}초",
                    track.sample_rate(),
                    track.channel_count(),
                    track.duration_secs()
                );
                Some(track)
            }
            Ok(_) => {
                warn!("[COMPRESS] 오디오 트랙이 비어있음 - 비디오만 인코딩");
                self.status(MSG_AUDIO_UNAVAILABLE);
                None
            }
            Err(e) => {
                warn!("[COMPRESS] 오디오 디코딩 실패 - 비디오만 인코딩: {}", e);
                self.status(MSG_AUDIO_UNAVAILABLE);
                None
            }
        };

        // 3. 먹서 + 비디오 인코더 설정
        let container = ContainerConfig {
            video: VideoTrackConfig {
                codec: VIDEO_CODEC.to_string(),
                geometry,
                frame_rate: self.options.frame_rate,
            },
            audio: audio.as_ref().map(|track| AudioTrackConfig {
                codec: AUDIO_CODEC.to_string(),
                sample_rate: track.sample_rate(),
                channel_count: track.channel_count(),
            }),
            chunk_size: self.options.chunk_size,
        };
        writer
            .configure(&container)
            .map_err(|e| CompressError::config(Stage::Container, e))?;
        self.status(MSG_MUXER_CREATED);

        video_encoder
            .configure(&VideoEncoderConfig {
                codec: VIDEO_CODEC.to_string(),
                geometry,
                bitrate_bps: self.options.bitrate_bps,
                frame_rate: self.options.frame_rate,
            })
            .map_err(|e| CompressError::config(Stage::VideoEncoder, e))?;

        // 4. 비디오 프레임 샘플링
        self.transition(JobState::EncodingVideo);
        self.encode_video(source, &mut video_encoder, &mut writer, geometry, total_frames)?;

        // 5. 오디오
        match audio {
            Some(track) => {
                self.transition(JobState::EncodingAudio);
                self.encode_audio(&track, &mut audio_encoder, &mut writer)?;
            }
            None => {
                self.status(MSG_NO_AUDIO);
                self.progress(VIDEO_SHARE, MSG_SKIPPING_AUDIO);
            }
        }

        // 6. 마무리 (moov 작성 + 남은 청크)
        self.transition(JobState::Finalizing);
        self.status(MSG_FINALIZING);
        let tail = writer
            .finalize()
            .map_err(|e| CompressError::runtime(Stage::Container, e))?;
        self.accept_chunks(tail)?;

        let artifact = self.assemble();
        let result = JobResult {
            size_bytes: artifact.len() as u64,
            artifact,
            elapsed: self.started.elapsed(),
        };
        info!(
            "[COMPRESS] 완료: {:.2}MB, {:.2}초",
            result.size_bytes as f64 / (1024.0 * 1024.0),
            result.elapsed_secs()
        );
        self.progress(100, MSG_COMPLETE);
        self.status(MSG_COMPLETE);
        self.observer.on_complete(&result);
        self.transition(JobState::Complete);
        Ok(result)
    }

    fn encode_video<S, V, W>(
        &mut self,
        source: &mut S,
        encoder: &mut V,
        writer: &mut W,
        geometry: Geometry,
        total_frames: u64,
    ) -> Result<(), CompressError>
    where
        S: MediaSource + ?Sized,
        V: VideoEncoder,
        W: ContainerWriter,
    {
        let frame_rate = self.options.frame_rate;

        for frame_index in 0..total_frames {
            self.check_cancelled(frame_index, total_frames)?;

            source
                .seek(frame_index as f64 / frame_rate)
                .map_err(CompressError::SourceUnreadable)?;
            let frame = source
                .sample_frame(geometry)
                .map_err(CompressError::SourceUnreadable)?;

            // seek 대기 중 취소됐을 수 있음
            self.check_cancelled(frame_index, total_frames)?;

            let timestamp_us = frame_timestamp_us(frame_index, frame_rate);
            let samples = encoder
                .encode(frame, timestamp_us)
                .map_err(|e| CompressError::runtime(Stage::VideoEncoder, e))?;
            self.write_samples(writer, samples)?;

            let done = frame_index + 1;
            self.progress(
                video_progress(done, total_frames),
                &format!("Encoding video: {} / {} frames", done, total_frames),
            );

            // 매 300프레임(~10초)마다 로그
            if done % 300 == 0 {
                info!("[COMPRESS] 비디오 진행: {}/{} ({}%)", done, total_frames, self.tracker.current());
            }
        }

        let tail = encoder
            .flush()
            .map_err(|e| CompressError::runtime(Stage::VideoEncoder, e))?;
        self.write_samples(writer, tail)?;
        debug!("[COMPRESS] 비디오 flush 완료");
        Ok(())
    }

    fn encode_audio<A, W>(
        &mut self,
        track: &AudioTrack,
        encoder: &mut A,
        writer: &mut W,
    ) -> Result<(), CompressError>
    where
        A: AudioEncoder,
        W: ContainerWriter,
    {
        let sample_rate = track.sample_rate();
        let channel_count = track.channel_count();
        encoder
            .configure(&AudioEncoderConfig {
                codec: AUDIO_CODEC.to_string(),
                sample_rate,
                channel_count,
                bitrate_bps: AUDIO_BITRATE_BPS,
            })
            .map_err(|e| CompressError::config(Stage::AudioEncoder, e))?;

        let total = track.frame_count();
        let mut rebaser = TimestampRebaser::default();
        let mut offset = 0usize;

        while offset < total {
            if self.cancel.is_cancelled() {
                info!("[COMPRESS] 취소됨 (audio {}/{} samples)", offset, total);
                return Err(CompressError::Cancelled);
            }

            let frames = AUDIO_BLOCK_FRAMES.min(total - offset);
            let block = AudioBlock {
                sample_rate,
                channel_count,
                frames,
                samples: track.interleave(offset, frames),
            };
            let samples = encoder
                .encode(block, audio_timestamp_us(offset, sample_rate))
                .map_err(|e| CompressError::runtime(Stage::AudioEncoder, e))?;
            self.write_rebased(writer, &mut rebaser, samples)?;

            offset += frames;
            self.progress(
                audio_progress(offset, total),
                &format!("Encoding audio: {} / {} samples", offset, total),
            );
        }

        let tail = encoder
            .flush()
            .map_err(|e| CompressError::runtime(Stage::AudioEncoder, e))?;
        self.write_rebased(writer, &mut rebaser, tail)?;
        debug!("[COMPRESS] 오디오 flush 완료");
        Ok(())
    }

    fn check_cancelled(&self, frame_index: u64, total_frames: u64) -> Result<(), CompressError> {
        if self.cancel.is_cancelled() {
            info!("[COMPRESS] 취소됨 (frame {}/{})", frame_index, total_frames);
            return Err(CompressError::Cancelled);
        }
        Ok(())
    }

    fn write_samples<W: ContainerWriter>(
        &mut self,
        writer: &mut W,
        samples: Vec<EncodedSample>,
    ) -> Result<(), CompressError> {
        for sample in samples {
            let chunks = writer
                .add_sample(sample)
                .map_err(|e| CompressError::runtime(Stage::Container, e))?;
            self.accept_chunks(chunks)?;
        }
        Ok(())
    }

    fn write_rebased<W: ContainerWriter>(
        &mut self,
        writer: &mut W,
        rebaser: &mut TimestampRebaser,
        samples: Vec<EncodedSample>,
    ) -> Result<(), CompressError> {
        let rebased = samples.into_iter().map(|s| rebaser.rebase(s)).collect();
        self.write_samples(writer, rebased)
    }

    /// 청크는 빈틈 없이 이어져야 함
    fn accept_chunks(&mut self, chunks: Vec<OutputChunk>) -> Result<(), CompressError> {
        for chunk in chunks {
            if chunk.position != self.received {
                return Err(CompressError::ChunkOutOfOrder {
                    expected: self.received,
                    actual: chunk.position,
                });
            }
            self.received = chunk.end();
            self.observer.on_chunk(&chunk);
            self.chunks.push(chunk);
        }
        Ok(())
    }

    fn assemble(&mut self) -> Vec<u8> {
        let mut artifact = Vec::with_capacity(self.received as usize);
        for mut chunk in self.chunks.drain(..) {
            artifact.append(&mut chunk.data);
        }
        artifact
    }

    fn progress(&mut self, percent: u32, message: &str) {
        let percent = self.tracker.advance(percent);
        self.observer.on_progress(&ProgressEvent {
            percent,
            message: message.to_string(),
        });
    }

    fn status(&mut self, message: &str) {
        debug!("[COMPRESS] {}", message);
        self.observer.on_status(message);
    }

    fn transition(&mut self, next: JobState) {
        debug!("[COMPRESS] 상태: {} → {}", self.state, next);
        self.state = next;
        self.observer.on_state(next);
    }

    fn fail(&mut self, err: &CompressError) {
        if err.is_cancelled() {
            info!("[COMPRESS] 작업 취소");
        } else {
            error!("[COMPRESS] 에러: {}", err);
        }
        self.chunks.clear();
        self.transition(JobState::Failed);
        self.observer.on_error(err);
    }
}
