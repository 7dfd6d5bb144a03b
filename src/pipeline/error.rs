// 압축 작업 에러 분류
// 협력자(소스/인코더/먹서)는 BoxError를 반환하고, 오케스트레이터가 단계별로 분류한다

use std::fmt;

/// 협력자 경계 에러 타입
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 에러가 발생한 협력자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    VideoEncoder,
    AudioEncoder,
    Container,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::VideoEncoder => "video encoder",
            Stage::AudioEncoder => "audio encoder",
            Stage::Container => "container writer",
        };
        f.write_str(name)
    }
}

/// 호출자용 에러 종류 (취소를 일반 실패와 구분)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SourceUnreadable,
    EncoderConfigRejected,
    EncoderRuntimeError,
    Cancelled,
}

impl ErrorKind {
    /// C ABI 코드
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::SourceUnreadable => 1,
            ErrorKind::EncoderConfigRejected => 2,
            ErrorKind::EncoderRuntimeError => 3,
            ErrorKind::Cancelled => 4,
        }
    }
}

/// 치명적 작업 실패 (작업은 Failed로 종료, 부분 결과물 없음)
#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("source unreadable: {0}")]
    SourceUnreadable(#[source] BoxError),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("{stage} configuration rejected: {source}")]
    ConfigRejected {
        stage: Stage,
        #[source]
        source: BoxError,
    },

    #[error("{stage} failed: {source}")]
    EncoderRuntime {
        stage: Stage,
        #[source]
        source: BoxError,
    },

    #[error("output chunk out of order: expected position {expected}, got {actual}")]
    ChunkOutOfOrder { expected: u64, actual: u64 },

    #[error("compression worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("compression cancelled")]
    Cancelled,
}

impl CompressError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompressError::SourceUnreadable(_) => ErrorKind::SourceUnreadable,
            CompressError::InvalidOptions(_) | CompressError::ConfigRejected { .. } => {
                ErrorKind::EncoderConfigRejected
            }
            CompressError::EncoderRuntime { .. }
            | CompressError::ChunkOutOfOrder { .. }
            | CompressError::WorkerPanicked(_) => ErrorKind::EncoderRuntimeError,
            CompressError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompressError::Cancelled)
    }

    pub(crate) fn config(stage: Stage, source: BoxError) -> Self {
        CompressError::ConfigRejected { stage, source }
    }

    pub(crate) fn runtime(stage: Stage, source: BoxError) -> Self {
        CompressError::EncoderRuntime { stage, source }
    }
}

/// 오디오 트랙 없음 / 디코딩 실패 (복구 가능 - 비디오만 진행)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no decodable audio track: {reason}")]
pub struct NoAudioTrack {
    pub reason: String,
}

impl NoAudioTrack {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}
