// Compress Engine - 단일 비디오 압축 오케스트레이터
// 소스 → 해상도 계획 → 프레임 샘플링(H.264) → 오디오 블록(AAC) → MP4 청크 스트림

pub mod pipeline;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
#[cfg(feature = "ffmpeg")]
pub mod encoding;
#[cfg(feature = "ffmpeg")]
pub mod ffi;

pub use pipeline::{
    CancelToken, Codecs, CompressError, CompressEvent, CompressJob, CompressObserver,
    CompressOptions, Compressor, ErrorKind, JobResult, JobState, Tier,
};

// FFI 함수들을 최상위에서 재export
#[cfg(feature = "ffmpeg")]
pub use ffi::*;
