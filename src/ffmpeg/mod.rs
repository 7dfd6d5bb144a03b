// FFmpeg 어댑터 모듈 (feature = "ffmpeg")
// 소스 디코딩 + 공용 에러 타입

use ffmpeg_next as ffmpeg;

pub mod source;

pub use source::FfmpegSource;

/// FFmpeg 어댑터 공용 에러
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("FFmpeg init failed: {0}")]
    Init(#[source] ffmpeg::Error),
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: ffmpeg::Error,
    },
    #[error("No {0} stream found")]
    NoStream(&'static str),
    #[error("{context}: {source}")]
    Ffmpeg {
        context: &'static str,
        #[source]
        source: ffmpeg::Error,
    },
    #[error("{0} encoder not found")]
    CodecNotFound(&'static str),
    #[error("{0}")]
    Invalid(String),
}

impl MediaError {
    pub(crate) fn ffmpeg(context: &'static str) -> impl FnOnce(ffmpeg::Error) -> Self {
        move |source| MediaError::Ffmpeg { context, source }
    }
}

/// 전역 FFmpeg 초기화 (여러 번 호출해도 안전)
pub(crate) fn init() -> Result<(), MediaError> {
    ffmpeg::init().map_err(MediaError::Init)
}
