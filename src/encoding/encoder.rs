// 비디오/오디오 인코더 - FFmpeg 기반 H.264 + AAC 인코딩
// 프레임/블록 → 인코더 → EncodedSample (μs timestamp), 먹싱은 muxer가 담당

use crate::ffmpeg::{init, MediaError};
use crate::pipeline::capability::{
    AudioBlock, AudioEncoder, AudioEncoderConfig, DecoderConfig, EncodedSample, PixelBuffer,
    PixelFormat, TrackKind, VideoEncoder, VideoEncoderConfig,
};
use crate::pipeline::error::BoxError;
use crate::pipeline::resolution::Geometry;
use ffmpeg::codec;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;
use ffmpeg_next as ffmpeg;
use log::{debug, info};

/// 인코더 timestamp 단위 (μs)
const MICROS: i32 = 1_000_000;

/// 열린 인코더의 코덱 전용 데이터 (GLOBAL_HEADER → avcC / AudioSpecificConfig)
fn extradata(context: &ffmpeg::codec::context::Context) -> Vec<u8> {
    unsafe {
        let ptr = context.as_ptr();
        let size = (*ptr).extradata_size;
        if (*ptr).extradata.is_null() || size <= 0 {
            return Vec::new();
        }
        std::slice::from_raw_parts((*ptr).extradata, size as usize).to_vec()
    }
}

/// 글로벌 헤더 플래그 (MP4 컨테이너 호환: SPS/PPS를 extradata로)
fn set_global_header(context: &mut ffmpeg::codec::context::Context) {
    unsafe {
        (*context.as_mut_ptr()).flags |= codec::flag::Flags::GLOBAL_HEADER.bits() as i32;
    }
}

/// H.264 비디오 인코더 (baseline, 비트레이트 제어)
pub struct H264Encoder {
    encoder: Option<ffmpeg::encoder::Video>,
    scaler: Option<scaling::Context>,
    geometry: Geometry,
    frame_duration_us: i64,
    decoder_config: Option<DecoderConfig>,
    config_sent: bool,
    frames_sent: u64,
}

// 작업 스레드 하나에서만 사용됨
unsafe impl Send for H264Encoder {}

impl Default for H264Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl H264Encoder {
    pub fn new() -> Self {
        Self {
            encoder: None,
            scaler: None,
            geometry: Geometry { width: 0, height: 0 },
            frame_duration_us: 0,
            decoder_config: None,
            config_sent: false,
            frames_sent: 0,
        }
    }

    fn open(&mut self, config: &VideoEncoderConfig) -> Result<(), MediaError> {
        init()?;
        let h264 = ffmpeg::encoder::find(codec::Id::H264).ok_or(MediaError::CodecNotFound("H.264"))?;

        let mut context = codec::context::Context::new_with_codec(h264);
        set_global_header(&mut context);
        let mut encoder = context
            .encoder()
            .video()
            .map_err(MediaError::ffmpeg("Failed to get video encoder"))?;

        let geometry = config.geometry;
        encoder.set_width(geometry.width);
        encoder.set_height(geometry.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(ffmpeg::Rational::new(1, MICROS));
        let fps_num = (config.frame_rate * 1000.0).round() as i32;
        encoder.set_frame_rate(Some(ffmpeg::Rational::new(fps_num, 1000)));
        encoder.set_bit_rate(config.bitrate_bps as usize);
        encoder.set_max_bit_rate(config.bitrate_bps as usize);
        encoder.set_gop((config.frame_rate.round() as u32).max(1) * 2);

        // avc1.420028 = Constrained Baseline, Level 4.0
        let mut opts = ffmpeg::Dictionary::new();
        opts.set("profile", "baseline");
        opts.set("level", "4.0");
        opts.set("preset", "medium");

        let encoder = encoder
            .open_as_with(h264, opts)
            .map_err(MediaError::ffmpeg("Failed to open H.264 encoder"))?;

        self.decoder_config = Some(DecoderConfig {
            codec: config.codec.clone(),
            description: extradata(&encoder),
        });
        self.geometry = geometry;
        self.frame_duration_us = (1_000_000.0 / config.frame_rate).round() as i64;
        self.encoder = Some(encoder);
        info!(
            "[ENCODER] H.264 열기: {} @ {}bps, {}fps",
            geometry, config.bitrate_bps, config.frame_rate
        );
        Ok(())
    }

    /// PixelBuffer → YUV420P ffmpeg 프레임
    fn to_video_frame(&mut self, frame: &PixelBuffer) -> Result<ffmpeg::frame::Video, MediaError> {
        if frame.geometry != self.geometry || !frame.is_well_formed() {
            return Err(MediaError::Invalid(format!(
                "Invalid frame: got {} ({} bytes), expected {}",
                frame.geometry,
                frame.data.len(),
                self.geometry
            )));
        }
        let w = self.geometry.width;
        let h = self.geometry.height;

        match frame.format {
            PixelFormat::Yuv420p => {
                let mut out = ffmpeg::frame::Video::new(Pixel::YUV420P, w, h);
                let (w, h) = (w as usize, h as usize);
                let planes = [(0, w, h), (1, w / 2, h / 2), (2, w / 2, h / 2)];
                let mut offset = 0;
                for (plane, plane_w, plane_h) in planes {
                    let stride = out.stride(plane);
                    let dst = out.data_mut(plane);
                    for row in 0..plane_h {
                        dst[row * stride..row * stride + plane_w]
                            .copy_from_slice(&frame.data[offset..offset + plane_w]);
                        offset += plane_w;
                    }
                }
                Ok(out)
            }
            PixelFormat::Rgba => {
                let mut src = ffmpeg::frame::Video::new(Pixel::RGBA, w, h);
                {
                    let linesize = src.stride(0);
                    let row_size = w as usize * 4;
                    let dst = src.data_mut(0);
                    for y in 0..h as usize {
                        dst[y * linesize..y * linesize + row_size]
                            .copy_from_slice(&frame.data[y * row_size..(y + 1) * row_size]);
                    }
                }
                if self.scaler.is_none() {
                    self.scaler = Some(
                        scaling::Context::get(
                            Pixel::RGBA,
                            w,
                            h,
                            Pixel::YUV420P,
                            w,
                            h,
                            scaling::Flags::FAST_BILINEAR,
                        )
                        .map_err(MediaError::ffmpeg("Failed to create scaler"))?,
                    );
                }
                let mut yuv = ffmpeg::frame::Video::empty();
                if let Some(scaler) = self.scaler.as_mut() {
                    scaler
                        .run(&src, &mut yuv)
                        .map_err(MediaError::ffmpeg("Scaler failed"))?;
                }
                Ok(yuv)
            }
        }
    }

    /// 인코더에서 패킷 수신 → EncodedSample
    fn receive_samples(&mut self) -> Result<Vec<EncodedSample>, MediaError> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| MediaError::Invalid("H.264 encoder not configured".into()))?;
        let mut samples = Vec::new();
        let mut packet = ffmpeg::Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            let pts = packet.pts().unwrap_or(0);
            let duration = if packet.duration() > 0 { packet.duration() } else { self.frame_duration_us };
            let decoder_config = if self.config_sent {
                None
            } else {
                self.config_sent = true;
                self.decoder_config.clone()
            };
            samples.push(EncodedSample {
                kind: TrackKind::Video,
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                timestamp_us: pts,
                decode_timestamp_us: packet.dts().unwrap_or(pts),
                duration_us: duration,
                is_key: packet.is_key(),
                decoder_config,
            });
        }
        Ok(samples)
    }
}

impl VideoEncoder for H264Encoder {
    fn configure(&mut self, config: &VideoEncoderConfig) -> Result<(), BoxError> {
        Ok(self.open(config)?)
    }

    fn encode(&mut self, frame: PixelBuffer, timestamp_us: i64) -> Result<Vec<EncodedSample>, BoxError> {
        let mut video_frame = self.to_video_frame(&frame)?;
        video_frame.set_pts(Some(timestamp_us));
        // 앞 프레임은 키프레임으로 강제
        if self.frames_sent == 0 {
            video_frame.set_kind(ffmpeg::picture::Type::I);
        }
        self.frames_sent += 1;

        self.encoder
            .as_mut()
            .ok_or_else(|| MediaError::Invalid("H.264 encoder not configured".into()))?
            .send_frame(&video_frame)
            .map_err(MediaError::ffmpeg("Failed to send frame"))?;
        Ok(self.receive_samples()?)
    }

    fn flush(&mut self) -> Result<Vec<EncodedSample>, BoxError> {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder
                .send_eof()
                .map_err(MediaError::ffmpeg("Failed to send EOF"))?;
        }
        let samples = self.receive_samples()?;
        debug!("[ENCODER] H.264 flush: {}프레임", self.frames_sent);
        Ok(samples)
    }
}

/// AAC-LC 오디오 인코더 (FLTP, 인코더 frame_size 단위로 재분할)
pub struct AacEncoder {
    encoder: Option<ffmpeg::encoder::Audio>,
    sample_rate: u32,
    channel_count: usize,
    frame_size: usize,
    /// 채널별 대기 샘플 (frame_size 미만 잔여분)
    pending: Vec<Vec<f32>>,
    /// 다음 프레임 pts (샘플 단위)
    next_pts: Option<i64>,
    decoder_config: Option<DecoderConfig>,
    config_sent: bool,
}

// 작업 스레드 하나에서만 사용됨
unsafe impl Send for AacEncoder {}

impl Default for AacEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AacEncoder {
    pub fn new() -> Self {
        Self {
            encoder: None,
            sample_rate: 0,
            channel_count: 0,
            frame_size: 1024,
            pending: Vec::new(),
            next_pts: None,
            decoder_config: None,
            config_sent: false,
        }
    }

    fn open(&mut self, config: &AudioEncoderConfig) -> Result<(), MediaError> {
        init()?;
        if config.channel_count == 0 || config.sample_rate == 0 {
            return Err(MediaError::Invalid(format!(
                "Unsupported audio format: {}Hz, {}ch",
                config.sample_rate, config.channel_count
            )));
        }
        let aac = ffmpeg::encoder::find(codec::Id::AAC).ok_or(MediaError::CodecNotFound("AAC"))?;

        let mut context = codec::context::Context::new_with_codec(aac);
        set_global_header(&mut context);
        let mut encoder = context
            .encoder()
            .audio()
            .map_err(MediaError::ffmpeg("Failed to get audio encoder"))?;

        encoder.set_rate(config.sample_rate as i32);
        encoder.set_ch_layout(ffmpeg::ChannelLayout::default(config.channel_count as i32));
        encoder.set_format(ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Planar));
        encoder.set_bit_rate(config.bitrate_bps as usize);
        encoder.set_time_base(ffmpeg::Rational::new(1, config.sample_rate as i32));

        let encoder = encoder
            .open_as_with(aac, ffmpeg::Dictionary::new())
            .map_err(MediaError::ffmpeg("Failed to open AAC encoder"))?;

        self.frame_size = (encoder.frame_size() as usize).max(1);
        self.decoder_config = Some(DecoderConfig {
            codec: config.codec.clone(),
            description: extradata(&encoder),
        });
        self.sample_rate = config.sample_rate;
        self.channel_count = config.channel_count as usize;
        self.pending = vec![Vec::new(); self.channel_count];
        self.encoder = Some(encoder);
        info!(
            "[ENCODER] AAC 열기: {}Hz, {}ch @ {}bps (frame_size={})",
            config.sample_rate, config.channel_count, config.bitrate_bps, self.frame_size
        );
        Ok(())
    }

    fn samples_to_us(&self, samples: i64) -> i64 {
        (samples as f64 * 1_000_000.0 / f64::from(self.sample_rate)).round() as i64
    }

    /// 대기 샘플에서 frame_size(또는 남은 전부)만큼 꺼내 인코더로 전송
    fn send_pending(&mut self, count: usize) -> Result<(), MediaError> {
        let layout = ffmpeg::ChannelLayout::default(self.channel_count as i32);
        let mut frame = ffmpeg::frame::Audio::new(
            ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Planar),
            count,
            layout,
        );
        frame.set_rate(self.sample_rate);
        for (ch, plane) in self.pending.iter_mut().enumerate() {
            let dst = frame.data_mut(ch);
            for (bytes, sample) in dst.chunks_exact_mut(4).zip(plane.drain(..count)) {
                bytes.copy_from_slice(&sample.to_ne_bytes());
            }
        }
        let pts = self.next_pts.unwrap_or(0);
        frame.set_pts(Some(pts));
        self.next_pts = Some(pts + count as i64);

        self.encoder
            .as_mut()
            .ok_or_else(|| MediaError::Invalid("AAC encoder not configured".into()))?
            .send_frame(&frame)
            .map_err(MediaError::ffmpeg("Failed to send audio frame"))
    }

    fn receive_samples(&mut self) -> Result<Vec<EncodedSample>, MediaError> {
        let mut packets = Vec::new();
        {
            let encoder = self
                .encoder
                .as_mut()
                .ok_or_else(|| MediaError::Invalid("AAC encoder not configured".into()))?;
            let mut packet = ffmpeg::Packet::empty();
            while encoder.receive_packet(&mut packet).is_ok() {
                packets.push((
                    packet.pts().unwrap_or(0),
                    packet.dts(),
                    packet.duration(),
                    packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                ));
            }
        }

        let mut samples = Vec::with_capacity(packets.len());
        for (pts, dts, duration, data) in packets {
            let decoder_config = if self.config_sent {
                None
            } else {
                self.config_sent = true;
                self.decoder_config.clone()
            };
            let duration = if duration > 0 { duration } else { self.frame_size as i64 };
            // priming 때문에 첫 pts는 음수 (orchestrator가 0으로 rebase)
            samples.push(EncodedSample {
                kind: TrackKind::Audio,
                data,
                timestamp_us: self.samples_to_us(pts),
                decode_timestamp_us: self.samples_to_us(dts.unwrap_or(pts)),
                duration_us: self.samples_to_us(duration),
                is_key: true,
                decoder_config,
            });
        }
        Ok(samples)
    }
}

impl AudioEncoder for AacEncoder {
    fn configure(&mut self, config: &AudioEncoderConfig) -> Result<(), BoxError> {
        Ok(self.open(config)?)
    }

    fn encode(&mut self, block: AudioBlock, timestamp_us: i64) -> Result<Vec<EncodedSample>, BoxError> {
        let channels = block.channel_count as usize;
        if channels != self.channel_count || block.samples.len() != block.frames * channels {
            return Err(MediaError::Invalid(format!(
                "Invalid audio block: {} samples for {} frames x {}ch",
                block.samples.len(),
                block.frames,
                channels
            ))
            .into());
        }
        if self.next_pts.is_none() {
            let start = (timestamp_us as f64 * f64::from(self.sample_rate) / 1_000_000.0).round() as i64;
            self.next_pts = Some(start);
        }

        // interleaved → planar
        for frame in block.samples.chunks_exact(channels) {
            for (plane, sample) in self.pending.iter_mut().zip(frame) {
                plane.push(*sample);
            }
        }

        // 프레임마다 패킷을 비워야 EAGAIN이 나지 않음
        let mut samples = Vec::new();
        while self.pending.first().map_or(0, Vec::len) >= self.frame_size {
            self.send_pending(self.frame_size)?;
            samples.extend(self.receive_samples()?);
        }
        Ok(samples)
    }

    fn flush(&mut self) -> Result<Vec<EncodedSample>, BoxError> {
        let mut samples = Vec::new();
        let remaining = self.pending.first().map_or(0, Vec::len);
        if remaining > 0 {
            self.send_pending(remaining)?;
            samples.extend(self.receive_samples()?);
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder
                .send_eof()
                .map_err(MediaError::ffmpeg("Failed to send audio EOF"))?;
        }
        samples.extend(self.receive_samples()?);
        Ok(samples)
    }
}
