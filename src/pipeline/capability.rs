// 외부 협력자 경계 - 소스 디코딩, 비디오/오디오 인코더, 컨테이너 라이터
// 모든 호출은 동기(블로킹): 호출이 반환되는 시점이 seek 완료 / 인코더 drain / 라이터 flush 시점

use crate::pipeline::error::{BoxError, NoAudioTrack};
use crate::pipeline::resolution::Geometry;

/// 소스 메타데이터
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceMetadata {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

impl SourceMetadata {
    /// 샘플링할 프레임 수 = floor(duration × fps)
    pub fn frame_count(&self, frame_rate: f64) -> u64 {
        let frames = (self.duration_secs * frame_rate).floor();
        if frames.is_finite() && frames > 0.0 {
            frames as u64
        } else {
            0
        }
    }
}

/// 픽셀 포맷
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4 bytes/pixel
    Rgba,
    /// [Y: w*h][U: w/2*h/2][V: w/2*h/2]
    Yuv420p,
}

impl PixelFormat {
    pub fn buffer_len(&self, geometry: Geometry) -> usize {
        let w = geometry.width as usize;
        let h = geometry.height as usize;
        match self {
            PixelFormat::Rgba => w * h * 4,
            PixelFormat::Yuv420p => w * h + (w / 2) * (h / 2) * 2,
        }
    }
}

/// 샘플링된 프레임 한 장 (인코더에 넘기는 순간 소유권 이전 → 즉시 해제)
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub geometry: Geometry,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.format.buffer_len(self.geometry)
    }
}

/// 소스 전체에서 디코딩한 오디오 (채널별 f32 PCM)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioTrack {
    /// 채널별(planar) 샘플로 생성, 모든 채널 길이가 같아야 함
    pub fn from_planar(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self, NoAudioTrack> {
        if sample_rate == 0 {
            return Err(NoAudioTrack::new("sample rate is zero"));
        }
        let first_len = match channels.first() {
            Some(ch) => ch.len(),
            None => return Err(NoAudioTrack::new("audio has no channels")),
        };
        if channels.iter().any(|ch| ch.len() != first_len) {
            return Err(NoAudioTrack::new("channel lengths differ"));
        }
        Ok(Self { sample_rate, channels })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u32 {
        self.channels.len() as u32
    }

    /// 채널당 샘플 수
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }

    /// [start, start + frames) 구간을 인터리브 (L R L R ...)
    pub fn interleave(&self, start: usize, frames: usize) -> Vec<f32> {
        let end = (start + frames).min(self.frame_count());
        let start = start.min(end);
        let mut out = Vec::with_capacity((end - start) * self.channels.len());
        for i in start..end {
            for channel in &self.channels {
                out.push(channel[i]);
            }
        }
        out
    }
}

/// 인코더에 넘기는 오디오 블록 (인터리브 f32)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub sample_rate: u32,
    pub channel_count: u32,
    /// 채널당 샘플 수
    pub frames: usize,
    pub samples: Vec<f32>,
}

/// 트랙 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// 디코더 설정 (avcC / AudioSpecificConfig 등 코덱 전용 데이터)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub codec: String,
    pub description: Vec<u8>,
}

/// 인코더 출력 단위
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSample {
    pub kind: TrackKind,
    pub data: Vec<u8>,
    /// presentation timestamp (μs)
    pub timestamp_us: i64,
    /// decode timestamp (μs)
    pub decode_timestamp_us: i64,
    pub duration_us: i64,
    pub is_key: bool,
    pub decoder_config: Option<DecoderConfig>,
}

impl EncodedSample {
    /// 타임스탬프를 offset만큼 당김 (음수는 0으로 고정)
    pub fn rebased(mut self, offset_us: i64) -> Self {
        self.timestamp_us = (self.timestamp_us - offset_us).max(0);
        self.decode_timestamp_us = (self.decode_timestamp_us - offset_us).max(0);
        self
    }
}

/// 직렬화된 컨테이너의 연속 구간
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// 최종 파일 내 byte offset
    pub position: u64,
    pub data: Vec<u8>,
}

impl OutputChunk {
    pub fn end(&self) -> u64 {
        self.position + self.data.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderConfig {
    pub codec: String,
    pub geometry: Geometry,
    pub bitrate_bps: u32,
    pub frame_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoderConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub channel_count: u32,
    pub bitrate_bps: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrackConfig {
    pub codec: String,
    pub geometry: Geometry,
    pub frame_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrackConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub channel_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerConfig {
    pub video: VideoTrackConfig,
    pub audio: Option<AudioTrackConfig>,
    pub chunk_size: usize,
}

/// 소스 미디어 (seek 가능한 프레임 접근 + 전체 오디오 디코딩)
pub trait MediaSource {
    fn metadata(&mut self) -> Result<SourceMetadata, BoxError>;

    /// 지정 시간으로 이동, 해당 프레임이 준비되면 반환
    fn seek(&mut self, timestamp_secs: f64) -> Result<(), BoxError>;

    /// 현재 위치의 프레임을 geometry 크기로 샘플링
    fn sample_frame(&mut self, geometry: Geometry) -> Result<PixelBuffer, BoxError>;

    /// 오디오 트랙 전체 디코딩 시도 (실패 = 오디오 없이 진행)
    fn decode_audio(&mut self) -> Result<AudioTrack, NoAudioTrack>;
}

pub trait VideoEncoder {
    fn configure(&mut self, config: &VideoEncoderConfig) -> Result<(), BoxError>;

    /// 프레임 제출, 이번 호출에서 나온 인코딩 샘플 반환
    fn encode(&mut self, frame: PixelBuffer, timestamp_us: i64) -> Result<Vec<EncodedSample>, BoxError>;

    /// 남은 프레임 전부 drain
    fn flush(&mut self) -> Result<Vec<EncodedSample>, BoxError>;
}

pub trait AudioEncoder {
    fn configure(&mut self, config: &AudioEncoderConfig) -> Result<(), BoxError>;

    fn encode(&mut self, block: AudioBlock, timestamp_us: i64) -> Result<Vec<EncodedSample>, BoxError>;

    fn flush(&mut self) -> Result<Vec<EncodedSample>, BoxError>;
}

/// 컨테이너 라이터 - 트랙별로 내부 버퍼링, 버퍼가 차면 청크 방출
pub trait ContainerWriter {
    fn configure(&mut self, config: &ContainerConfig) -> Result<(), BoxError>;

    fn add_sample(&mut self, sample: EncodedSample) -> Result<Vec<OutputChunk>, BoxError>;

    /// 남은 박스/인덱스 기록 후 마지막 청크들 반환
    fn finalize(&mut self) -> Result<Vec<OutputChunk>, BoxError>;
}
