// 인코딩 & 먹싱 모듈 (feature = "ffmpeg")
// H.264 비디오 + AAC 오디오 → MP4 컨테이너

pub mod encoder;
pub mod muxer;

pub use encoder::{AacEncoder, H264Encoder};
pub use muxer::Mp4Muxer;
