// C ABI 모듈 (feature = "ffmpeg")
// 호스트 앱은 opaque 핸들 + 폴링(progress/finished/error)으로 작업 관리

pub mod compressor;
pub mod types;

pub use compressor::*;
pub use types::{string_free, ErrorCode};
