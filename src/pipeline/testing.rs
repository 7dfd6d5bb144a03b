// 테스트용 가짜 협력자 - 결정적 출력 + 호출 기록 (Probe)

use crate::pipeline::capability::*;
use crate::pipeline::error::{BoxError, CompressError, ErrorKind, NoAudioTrack};
use crate::pipeline::events::{CompressObserver, JobState, ProgressEvent};
use crate::pipeline::orchestrator::{CancelToken, Codecs, JobResult};
use crate::pipeline::resolution::Geometry;
use std::sync::{Arc, Mutex};

/// 테스트 로그 출력 (RUST_LOG로 레벨 지정, 중복 호출 무시)
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// AAC 인코더 priming 지연 흉내 (μs)
pub const AUDIO_PRIMING_US: i64 = 21_333;

/// 협력자 호출 기록
#[derive(Debug, Default)]
pub struct ProbeLog {
    pub seeks: Vec<f64>,
    pub video_config: Option<VideoEncoderConfig>,
    pub video_submissions: Vec<i64>,
    pub audio_config: Option<AudioEncoderConfig>,
    pub audio_blocks: Vec<(i64, usize)>,
    pub container_config: Option<ContainerConfig>,
    pub written: Vec<(TrackKind, i64)>,
    pub finalized: bool,
}

pub type Probe = Arc<Mutex<ProbeLog>>;

pub fn probe() -> Probe {
    Arc::new(Mutex::new(ProbeLog::default()))
}

/// 가짜 소스
pub struct FakeSource {
    pub metadata: Result<SourceMetadata, String>,
    pub audio: Result<AudioTrack, NoAudioTrack>,
    pub probe: Probe,
    /// n번째(0부터) seek 호출에서 실패
    pub fail_seek_at: Option<usize>,
}

impl FakeSource {
    pub fn silent(duration_secs: f64, width: u32, height: u32, probe: &Probe) -> Self {
        Self {
            metadata: Ok(SourceMetadata { duration_secs, width, height }),
            audio: Err(NoAudioTrack::new("no audio stream")),
            probe: probe.clone(),
            fail_seek_at: None,
        }
    }

    /// 사인파 비슷한 결정적 PCM
    pub fn with_audio(mut self, sample_rate: u32, channels: usize, duration_secs: f64) -> Self {
        let frames = (f64::from(sample_rate) * duration_secs).round() as usize;
        let planar: Vec<Vec<f32>> = (0..channels)
            .map(|ch| (0..frames).map(|i| ((i + ch) % 100) as f32 / 100.0).collect())
            .collect();
        self.audio = AudioTrack::from_planar(sample_rate, planar);
        self
    }

    pub fn corrupt(probe: &Probe) -> Self {
        Self {
            metadata: Err("moov atom not found".into()),
            audio: Err(NoAudioTrack::new("corrupt")),
            probe: probe.clone(),
            fail_seek_at: None,
        }
    }
}

impl MediaSource for FakeSource {
    fn metadata(&mut self) -> Result<SourceMetadata, BoxError> {
        self.metadata.clone().map_err(Into::into)
    }

    fn seek(&mut self, timestamp_secs: f64) -> Result<(), BoxError> {
        let index = {
            let mut log = self.probe.lock().unwrap();
            log.seeks.push(timestamp_secs);
            log.seeks.len() - 1
        };
        if self.fail_seek_at == Some(index) {
            return Err("truncated packet".into());
        }
        Ok(())
    }

    fn sample_frame(&mut self, geometry: Geometry) -> Result<PixelBuffer, BoxError> {
        let format = PixelFormat::Yuv420p;
        Ok(PixelBuffer {
            geometry,
            format,
            data: vec![16u8; format.buffer_len(geometry)],
        })
    }

    fn decode_audio(&mut self) -> Result<AudioTrack, NoAudioTrack> {
        self.audio.clone()
    }
}

/// 가짜 비디오 인코더 - 1프레임 지연 후 출력 (flush에서 마지막 프레임 방출)
#[derive(Default)]
pub struct FakeVideoEncoder {
    pub probe: Probe,
    pub reject_config: bool,
    /// n번째(0부터) encode 호출에서 실패
    pub fail_at: Option<usize>,
    pending: Option<EncodedSample>,
    frame_duration_us: i64,
}

impl FakeVideoEncoder {
    pub fn new(probe: &Probe) -> Self {
        Self { probe: probe.clone(), ..Self::default() }
    }
}

impl VideoEncoder for FakeVideoEncoder {
    fn configure(&mut self, config: &VideoEncoderConfig) -> Result<(), BoxError> {
        if self.reject_config {
            return Err("unsupported codec configuration".into());
        }
        self.frame_duration_us = (1_000_000.0 / config.frame_rate).round() as i64;
        self.probe.lock().unwrap().video_config = Some(config.clone());
        Ok(())
    }

    fn encode(&mut self, frame: PixelBuffer, timestamp_us: i64) -> Result<Vec<EncodedSample>, BoxError> {
        let index = {
            let mut log = self.probe.lock().unwrap();
            log.video_submissions.push(timestamp_us);
            log.video_submissions.len() - 1
        };
        if self.fail_at == Some(index) {
            return Err("encoder crashed".into());
        }
        if !frame.is_well_formed() {
            return Err("malformed frame".into());
        }
        let sample = EncodedSample {
            kind: TrackKind::Video,
            data: vec![(index % 251) as u8; 8],
            timestamp_us,
            decode_timestamp_us: timestamp_us,
            duration_us: self.frame_duration_us,
            is_key: index % 30 == 0,
            decoder_config: (index == 0).then(|| DecoderConfig {
                codec: "avc1.420028".into(),
                description: vec![1, 0x42, 0, 0x28],
            }),
        };
        Ok(self.pending.replace(sample).into_iter().collect())
    }

    fn flush(&mut self) -> Result<Vec<EncodedSample>, BoxError> {
        Ok(self.pending.take().into_iter().collect())
    }
}

/// 가짜 오디오 인코더 - priming만큼 당겨진 타임스탬프로 1블록 지연 출력
#[derive(Default)]
pub struct FakeAudioEncoder {
    pub probe: Probe,
    pub reject_config: bool,
    pub fail_at: Option<usize>,
    pending: Option<EncodedSample>,
    sample_rate: u32,
}

impl FakeAudioEncoder {
    pub fn new(probe: &Probe) -> Self {
        Self { probe: probe.clone(), ..Self::default() }
    }
}

impl AudioEncoder for FakeAudioEncoder {
    fn configure(&mut self, config: &AudioEncoderConfig) -> Result<(), BoxError> {
        if self.reject_config {
            return Err("unsupported sample rate".into());
        }
        self.sample_rate = config.sample_rate;
        self.probe.lock().unwrap().audio_config = Some(config.clone());
        Ok(())
    }

    fn encode(&mut self, block: AudioBlock, timestamp_us: i64) -> Result<Vec<EncodedSample>, BoxError> {
        let index = {
            let mut log = self.probe.lock().unwrap();
            log.audio_blocks.push((timestamp_us, block.frames));
            log.audio_blocks.len() - 1
        };
        if self.fail_at == Some(index) {
            return Err("aac encode failed".into());
        }
        if block.samples.len() != block.frames * block.channel_count as usize {
            return Err("block is not interleaved".into());
        }
        let ts = timestamp_us - AUDIO_PRIMING_US;
        let sample = EncodedSample {
            kind: TrackKind::Audio,
            data: vec![0xAA; 4],
            timestamp_us: ts,
            decode_timestamp_us: ts,
            duration_us: (block.frames as f64 * 1_000_000.0 / f64::from(self.sample_rate)).round() as i64,
            is_key: true,
            decoder_config: (index == 0).then(|| DecoderConfig {
                codec: "mp4a.40.2".into(),
                description: vec![0x12, 0x10],
            }),
        };
        Ok(self.pending.replace(sample).into_iter().collect())
    }

    fn flush(&mut self) -> Result<Vec<EncodedSample>, BoxError> {
        Ok(self.pending.take().into_iter().collect())
    }
}

/// 가짜 컨테이너 라이터 - 샘플을 직렬화해 chunk_size마다 청크 방출
#[derive(Default)]
pub struct FakeWriter {
    pub probe: Probe,
    /// 두 번째 청크의 position을 일부러 틀리게 보고
    pub misreport_positions: bool,
    pub reject_config: bool,
    /// n번째(0부터) add_sample 호출에서 실패
    pub fail_add_at: Option<usize>,
    pub fail_finalize: bool,
    chunk_size: usize,
    buffer: Vec<u8>,
    position: u64,
    emitted: usize,
}

impl FakeWriter {
    pub fn new(probe: &Probe) -> Self {
        Self { probe: probe.clone(), ..Self::default() }
    }

    fn drain(&mut self, all: bool) -> Vec<OutputChunk> {
        let mut chunks = Vec::new();
        while self.buffer.len() >= self.chunk_size || (all && !self.buffer.is_empty()) {
            let take = self.chunk_size.min(self.buffer.len());
            let data: Vec<u8> = self.buffer.drain(..take).collect();
            let mut position = self.position;
            if self.misreport_positions && self.emitted == 1 {
                position += 1;
            }
            self.position += data.len() as u64;
            self.emitted += 1;
            chunks.push(OutputChunk { position, data });
        }
        chunks
    }
}

impl ContainerWriter for FakeWriter {
    fn configure(&mut self, config: &ContainerConfig) -> Result<(), BoxError> {
        if self.reject_config {
            return Err("unsupported container".into());
        }
        self.chunk_size = config.chunk_size;
        self.buffer.extend_from_slice(b"ftyp");
        self.probe.lock().unwrap().container_config = Some(config.clone());
        Ok(())
    }

    fn add_sample(&mut self, sample: EncodedSample) -> Result<Vec<OutputChunk>, BoxError> {
        let index = {
            let mut log = self.probe.lock().unwrap();
            log.written.push((sample.kind, sample.timestamp_us));
            log.written.len() - 1
        };
        if self.fail_add_at == Some(index) {
            return Err("disk full".into());
        }
        self.buffer.extend_from_slice(&sample.timestamp_us.to_be_bytes());
        self.buffer.extend_from_slice(&sample.data);
        Ok(self.drain(false))
    }

    fn finalize(&mut self) -> Result<Vec<OutputChunk>, BoxError> {
        if self.fail_finalize {
            return Err("moov write failed".into());
        }
        self.buffer.extend_from_slice(b"moov");
        self.probe.lock().unwrap().finalized = true;
        Ok(self.drain(true))
    }
}

pub type FakeCodecs = Codecs<FakeVideoEncoder, FakeAudioEncoder, FakeWriter>;

pub fn fake_codecs(probe: &Probe) -> FakeCodecs {
    Codecs {
        video: FakeVideoEncoder::new(probe),
        audio: FakeAudioEncoder::new(probe),
        writer: FakeWriter::new(probe),
    }
}

/// 모든 이벤트 기록 (+ n번째 비디오 프레임 후 취소)
#[derive(Default)]
pub struct RecordingObserver {
    pub states: Vec<JobState>,
    pub progress: Vec<ProgressEvent>,
    pub statuses: Vec<String>,
    pub chunks: Vec<OutputChunk>,
    pub completed: Vec<u64>,
    pub errors: Vec<ErrorKind>,
    pub cancel_after_frame: Option<(u64, CancelToken)>,
    video_frames: u64,
}

impl RecordingObserver {
    /// n번째 비디오 프레임 진행 이벤트에서 token 취소
    pub fn cancelling_after(frames: u64, token: &CancelToken) -> Self {
        Self {
            cancel_after_frame: Some((frames, token.clone())),
            ..Self::default()
        }
    }

    pub fn percents(&self) -> Vec<u8> {
        self.progress.iter().map(|p| p.percent).collect()
    }

    pub fn chunk_bytes(&self) -> Vec<u8> {
        self.chunks.iter().flat_map(|c| c.data.iter().copied()).collect()
    }
}

impl CompressObserver for RecordingObserver {
    fn on_state(&mut self, state: JobState) {
        self.states.push(state);
    }

    fn on_progress(&mut self, event: &ProgressEvent) {
        if event.message.starts_with("Encoding video") {
            self.video_frames += 1;
            if let Some((after, token)) = &self.cancel_after_frame {
                if self.video_frames == *after {
                    token.cancel();
                }
            }
        }
        self.progress.push(event.clone());
    }

    fn on_status(&mut self, message: &str) {
        self.statuses.push(message.to_string());
    }

    fn on_chunk(&mut self, chunk: &OutputChunk) {
        self.chunks.push(chunk.clone());
    }

    fn on_complete(&mut self, result: &JobResult) {
        self.completed.push(result.size_bytes);
    }

    fn on_error(&mut self, error: &CompressError) {
        self.errors.push(error.kind());
    }
}
