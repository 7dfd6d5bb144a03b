// 압축 파이프라인 - 코덱/컨테이너와 무관한 오케스트레이션 계층
// 실제 디코딩/인코딩/먹싱은 capability 트레이트 구현체(ffmpeg 어댑터 등)가 담당

pub mod capability;
pub mod error;
pub mod events;
pub mod job;
pub mod options;
pub mod orchestrator;
pub mod resolution;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::{
    AudioBlock, AudioEncoder, AudioTrack, ContainerWriter, EncodedSample, MediaSource,
    OutputChunk, PixelBuffer, PixelFormat, SourceMetadata, TrackKind, VideoEncoder,
};
pub use error::{BoxError, CompressError, ErrorKind, NoAudioTrack, Stage};
pub use events::{ChannelObserver, CompressEvent, CompressObserver, JobState, ProgressEvent};
pub use job::CompressJob;
pub use options::CompressOptions;
pub use orchestrator::{CancelToken, Codecs, Compressor, JobResult};
pub use resolution::{Geometry, Tier};
