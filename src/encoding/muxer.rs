// MP4 먹서 - 인코딩된 샘플을 트랙별로 버퍼링 후 finalize에서 MP4 작성
// 항상 fast start(moov 선배치): 파일 끝에서 재배치가 필요하므로 임시 파일에 쓰고 청크로 읽어 반환

use crate::ffmpeg::{init, MediaError};
use crate::pipeline::capability::{
    AudioTrackConfig, ContainerConfig, ContainerWriter, EncodedSample, OutputChunk, TrackKind,
    VideoTrackConfig,
};
use crate::pipeline::error::BoxError;
use ffmpeg_next as ffmpeg;
use log::{debug, info};
use std::path::Path;

/// 샘플 timestamp 단위 (μs)
const MICROS: i32 = 1_000_000;

/// 트랙별 샘플 버퍼
#[derive(Default)]
struct TrackBuffer {
    samples: Vec<EncodedSample>,
    description: Vec<u8>,
}

impl TrackBuffer {
    fn push(&mut self, mut sample: EncodedSample) {
        if let Some(config) = sample.decoder_config.take() {
            debug!(
                "[MUXER] {:?} decoder config: {} ({} bytes)",
                sample.kind,
                config.codec,
                config.description.len()
            );
            self.description = config.description;
        }
        self.samples.push(sample);
    }
}

/// MP4 컨테이너 라이터
#[derive(Default)]
pub struct Mp4Muxer {
    config: Option<ContainerConfig>,
    video: TrackBuffer,
    audio: TrackBuffer,
}

impl Mp4Muxer {
    pub fn new() -> Self {
        Self::default()
    }

    fn container(&self) -> Result<&ContainerConfig, MediaError> {
        self.config
            .as_ref()
            .ok_or_else(|| MediaError::Invalid("muxer not configured".into()))
    }

    /// 버퍼링된 샘플을 path에 MP4로 기록
    fn write_file(&self, path: &Path) -> Result<(), MediaError> {
        init()?;
        let config = self.container()?;

        let mut octx = ffmpeg::format::output_as(&path, "mp4").map_err(|source| MediaError::Open {
            path: path.display().to_string(),
            source,
        })?;

        let video_index = add_video_stream(&mut octx, &config.video, &self.video.description)?;
        let audio_index = match (&config.audio, self.audio.samples.is_empty()) {
            (Some(audio), false) => Some(add_audio_stream(&mut octx, audio, &self.audio.description)?),
            _ => None,
        };

        let mut opts = ffmpeg::Dictionary::new();
        opts.set("movflags", "faststart");
        octx.write_header_with(opts)
            .map_err(MediaError::ffmpeg("Failed to write header"))?;

        // 트랙 간 dts 순으로 병합해 인터리브
        let mut video = self.video.samples.iter().peekable();
        let mut audio = self.audio.samples.iter().peekable();
        let source_tb = ffmpeg::Rational::new(1, MICROS);
        let mut written = 0usize;

        loop {
            let take_video = match (video.peek(), audio.peek()) {
                (Some(v), Some(a)) => v.decode_timestamp_us <= a.decode_timestamp_us,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let (sample, index) = if take_video {
                match video.next() {
                    Some(sample) => (sample, video_index),
                    None => break,
                }
            } else {
                match (audio.next(), audio_index) {
                    (Some(sample), Some(index)) => (sample, index),
                    (Some(_), None) => continue,
                    (None, _) => break,
                }
            };

            let stream_tb = octx
                .stream(index)
                .ok_or(MediaError::NoStream("output"))?
                .time_base();
            let mut packet = ffmpeg::Packet::copy(&sample.data);
            packet.set_stream(index);
            packet.set_pts(Some(sample.timestamp_us));
            packet.set_dts(Some(sample.decode_timestamp_us));
            packet.set_duration(sample.duration_us);
            if sample.is_key {
                packet.set_flags(ffmpeg::packet::Flags::KEY);
            }
            // time_base 변환 (μs → 스트림)
            packet.rescale_ts(source_tb, stream_tb);
            packet
                .write_interleaved(&mut octx)
                .map_err(MediaError::ffmpeg("Failed to write packet"))?;
            written += 1;
        }

        octx.write_trailer()
            .map_err(MediaError::ffmpeg("Failed to write trailer"))?;
        debug!("[MUXER] 패킷 {}개 기록", written);
        Ok(())
    }
}

/// codecpar에 extradata 복사 (FFmpeg 할당자 + padding 필수)
unsafe fn set_extradata(par: *mut ffmpeg::ffi::AVCodecParameters, data: &[u8]) -> Result<(), MediaError> {
    if data.is_empty() {
        return Ok(());
    }
    let padding = ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
    let buf = ffmpeg::ffi::av_mallocz(data.len() + padding) as *mut u8;
    if buf.is_null() {
        return Err(MediaError::Invalid("extradata allocation failed".into()));
    }
    std::ptr::copy_nonoverlapping(data.as_ptr(), buf, data.len());
    (*par).extradata = buf;
    (*par).extradata_size = data.len() as i32;
    Ok(())
}

fn add_video_stream(
    octx: &mut ffmpeg::format::context::Output,
    track: &VideoTrackConfig,
    description: &[u8],
) -> Result<usize, MediaError> {
    let mut params = ffmpeg::codec::Parameters::new();
    unsafe {
        let par = params.as_mut_ptr();
        (*par).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
        (*par).codec_id = ffmpeg::ffi::AVCodecID::AV_CODEC_ID_H264;
        (*par).width = track.geometry.width as i32;
        (*par).height = track.geometry.height as i32;
        (*par).format = ffmpeg::ffi::AVPixelFormat::AV_PIX_FMT_YUV420P as i32;
        set_extradata(par, description)?;
    }

    let mut stream = octx
        .add_stream(ffmpeg::codec::Id::H264)
        .map_err(MediaError::ffmpeg("Failed to add video stream"))?;
    stream.set_parameters(params);
    stream.set_time_base(ffmpeg::Rational::new(1, MICROS));
    let fps_num = (track.frame_rate * 1000.0).round() as i32;
    stream.set_avg_frame_rate(ffmpeg::Rational::new(fps_num, 1000));
    info!("[MUXER] 비디오 트랙: {} {}", track.codec, track.geometry);
    Ok(stream.index())
}

fn add_audio_stream(
    octx: &mut ffmpeg::format::context::Output,
    track: &AudioTrackConfig,
    description: &[u8],
) -> Result<usize, MediaError> {
    let mut params = ffmpeg::codec::Parameters::new();
    unsafe {
        let par = params.as_mut_ptr();
        (*par).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_AUDIO;
        (*par).codec_id = ffmpeg::ffi::AVCodecID::AV_CODEC_ID_AAC;
        (*par).sample_rate = track.sample_rate as i32;
        (*par).format = ffmpeg::ffi::AVSampleFormat::AV_SAMPLE_FMT_FLTP as i32;
        (*par).frame_size = 1024;
        ffmpeg::ffi::av_channel_layout_default(&mut (*par).ch_layout, track.channel_count as i32);
        set_extradata(par, description)?;
    }

    let mut stream = octx
        .add_stream(ffmpeg::codec::Id::AAC)
        .map_err(MediaError::ffmpeg("Failed to add audio stream"))?;
    stream.set_parameters(params);
    stream.set_time_base(ffmpeg::Rational::new(1, track.sample_rate as i32));
    info!(
        "[MUXER] 오디오 트랙: {} {}Hz {}ch",
        track.codec, track.sample_rate, track.channel_count
    );
    Ok(stream.index())
}

/// 바이트를 chunk_size 단위 OutputChunk로 분할
fn split_chunks(bytes: Vec<u8>, chunk_size: usize) -> Vec<OutputChunk> {
    let mut position = 0u64;
    bytes
        .chunks(chunk_size.max(1))
        .map(|data| {
            let chunk = OutputChunk {
                position,
                data: data.to_vec(),
            };
            position += data.len() as u64;
            chunk
        })
        .collect()
}

impl ContainerWriter for Mp4Muxer {
    fn configure(&mut self, config: &ContainerConfig) -> Result<(), BoxError> {
        if config.video.geometry.width == 0 || config.video.geometry.height == 0 {
            return Err(MediaError::Invalid(format!("Invalid video geometry {}", config.video.geometry)).into());
        }
        self.config = Some(config.clone());
        self.video = TrackBuffer::default();
        self.audio = TrackBuffer::default();
        Ok(())
    }

    fn add_sample(&mut self, sample: EncodedSample) -> Result<Vec<OutputChunk>, BoxError> {
        let has_audio = self.container()?.audio.is_some();
        match sample.kind {
            TrackKind::Video => self.video.push(sample),
            TrackKind::Audio if has_audio => self.audio.push(sample),
            TrackKind::Audio => {
                return Err(MediaError::Invalid("audio sample for a video-only container".into()).into())
            }
        }
        // 모든 바이트는 finalize에서 한 번에 방출
        Ok(Vec::new())
    }

    fn finalize(&mut self) -> Result<Vec<OutputChunk>, BoxError> {
        let chunk_size = self.container()?.chunk_size;
        let file = tempfile::Builder::new()
            .prefix("compress-")
            .suffix(".mp4")
            .tempfile()?;

        self.write_file(file.path())?;
        let bytes = std::fs::read(file.path())?;
        info!(
            "[MUXER] MP4 완료: {} bytes (video {}, audio {} samples)",
            bytes.len(),
            self.video.samples.len(),
            self.audio.samples.len()
        );

        self.video = TrackBuffer::default();
        self.audio = TrackBuffer::default();
        Ok(split_chunks(bytes, chunk_size))
    }
}
