// FFmpeg 소스 - seek + PTS 목표 디코딩으로 프레임 샘플링, 오디오 전체 디코딩
// 아키텍처: 첫 metadata() 호출 시 지연 오픈, 순차 접근은 seek 없이 forward decode

use crate::ffmpeg::{init, MediaError};
use crate::pipeline::capability::{
    AudioTrack, MediaSource, PixelBuffer, PixelFormat, SourceMetadata,
};
use crate::pipeline::error::{BoxError, NoAudioTrack};
use crate::pipeline::resolution::Geometry;
use ffmpeg_next as ffmpeg;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// 이 범위(초) 이내의 전진은 seek 없이 디코딩으로 따라감
const FORWARD_THRESHOLD_SECS: f64 = 2.0;

/// 열린 비디오 스트림 상태
struct VideoState {
    input_ctx: ffmpeg::format::context::Input,
    video_stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    time_base: f64,
    fps: f64,
    metadata: SourceMetadata,
    /// 출력 geometry별 스케일러 (geometry가 바뀌면 재생성)
    scaler: Option<(Geometry, ffmpeg::software::scaling::Context)>,
    /// 목표 timestamp (초)
    target_secs: f64,
    /// 마지막으로 채택한 프레임 + PTS(초)
    current: Option<(f64, ffmpeg::frame::Video)>,
    /// 목표를 지나쳐 읽은 프레임 (다음 목표에서 사용)
    lookahead: Option<(f64, ffmpeg::frame::Video)>,
    /// current를 변환한 결과 캐시 (같은 프레임 반복 시 재사용)
    converted: Option<PixelBuffer>,
    eof_sent: bool,
}

/// 파일 기반 미디어 소스
pub struct FfmpegSource {
    path: PathBuf,
    video: Option<VideoState>,
}

// FFmpeg 컨텍스트는 작업 스레드 하나에서만 사용됨
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            video: None,
        }
    }

    /// 입력 열기 (moov atom이 끝에 있는 파일은 probesize 확장 후 재시도)
    fn open_input(path: &Path) -> Result<ffmpeg::format::context::Input, MediaError> {
        init()?;
        ffmpeg::format::input(&path)
            .or_else(|_| {
                let mut opts = ffmpeg::Dictionary::new();
                opts.set("probesize", "100000000"); // 100MB
                opts.set("analyzeduration", "30000000"); // 30초
                ffmpeg::format::input_with_dictionary(&path, opts)
            })
            .map_err(|source| MediaError::Open {
                path: path.display().to_string(),
                source,
            })
    }

    fn open_video(path: &Path) -> Result<VideoState, MediaError> {
        let input_ctx = Self::open_input(path)?;

        let video_stream = input_ctx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or(MediaError::NoStream("video"))?;
        let video_stream_index = video_stream.index();
        let time_base = f64::from(video_stream.time_base());
        let fps = f64::from(video_stream.avg_frame_rate());

        let mut context = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
            .map_err(MediaError::ffmpeg("Failed to create decoder context"))?;
        // 디코더당 최대 4스레드
        if let Ok(parallelism) = std::thread::available_parallelism() {
            context.set_threading(ffmpeg::threading::Config {
                kind: ffmpeg::threading::Type::Frame,
                count: parallelism.get().min(4),
            });
        }
        let decoder = context
            .decoder()
            .video()
            .map_err(MediaError::ffmpeg("Failed to get video decoder"))?;

        let duration_secs = if video_stream.duration() > 0 {
            video_stream.duration() as f64 * time_base
        } else if input_ctx.duration() > 0 {
            input_ctx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
        } else {
            0.0
        };

        if decoder.width() == 0 || decoder.height() == 0 {
            return Err(MediaError::Invalid(format!(
                "Invalid video dimensions {}x{}",
                decoder.width(),
                decoder.height()
            )));
        }

        let metadata = SourceMetadata {
            duration_secs,
            width: decoder.width(),
            height: decoder.height(),
        };
        info!(
            "[DECODER] 열기: {} ({}x{}, {:.2}fps, {:.2}초)",
            path.display(),
            metadata.width,
            metadata.height,
            fps,
            metadata.duration_secs
        );

        Ok(VideoState {
            input_ctx,
            video_stream_index,
            decoder,
            time_base,
            fps,
            metadata,
            scaler: None,
            target_secs: 0.0,
            current: None,
            lookahead: None,
            converted: None,
            eof_sent: false,
        })
    }

    fn video_mut(&mut self) -> Result<&mut VideoState, MediaError> {
        if self.video.is_none() {
            self.video = Some(Self::open_video(&self.path)?);
        }
        self.video
            .as_mut()
            .ok_or_else(|| MediaError::Invalid("video state unavailable".into()))
    }

    /// 오디오 스트림 전체를 f32 planar로 디코딩 (원본 샘플레이트/채널 유지)
    fn decode_audio_planar(path: &Path) -> Result<(u32, Vec<Vec<f32>>), MediaError> {
        let mut input_ctx = Self::open_input(path)?;

        let audio_stream = input_ctx
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .ok_or(MediaError::NoStream("audio"))?;
        let audio_stream_index = audio_stream.index();

        let context = ffmpeg::codec::context::Context::from_parameters(audio_stream.parameters())
            .map_err(MediaError::ffmpeg("Failed to create audio context"))?;
        let mut decoder = context
            .decoder()
            .audio()
            .map_err(MediaError::ffmpeg("Failed to get audio decoder"))?;

        let sample_rate = decoder.rate();
        let mut layout = decoder.channel_layout();
        if layout.channels() <= 0 {
            layout = ffmpeg::ChannelLayout::default(2);
        }
        let channel_count = layout.channels() as usize;

        // 입력 포맷 → f32 planar (레이트/채널은 그대로)
        let mut resampler = ffmpeg::software::resampling::Context::get(
            decoder.format(),
            layout,
            sample_rate,
            ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Planar),
            layout,
            sample_rate,
        )
        .map_err(MediaError::ffmpeg("Failed to create resampler"))?;

        let mut planes: Vec<Vec<f32>> = vec![Vec::new(); channel_count];
        let mut drain = |decoder: &mut ffmpeg::codec::decoder::Audio,
                         planes: &mut Vec<Vec<f32>>|
         -> Result<(), MediaError> {
            let mut decoded = ffmpeg::frame::Audio::empty();
            while decoder.receive_frame(&mut decoded).is_ok() {
                let mut resampled = ffmpeg::frame::Audio::empty();
                resampler
                    .run(&decoded, &mut resampled)
                    .map_err(MediaError::ffmpeg("Resample failed"))?;
                let samples = resampled.samples();
                for (ch, plane) in planes.iter_mut().enumerate() {
                    let bytes = resampled.data(ch);
                    plane.extend(
                        bytes
                            .chunks_exact(4)
                            .take(samples)
                            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
                    );
                }
            }
            Ok(())
        };

        for (stream, packet) in input_ctx.packets() {
            if stream.index() != audio_stream_index {
                continue;
            }
            if let Err(e) = decoder.send_packet(&packet) {
                debug!("[DECODER] 오디오 패킷 건너뜀: {}", e);
                continue;
            }
            drain(&mut decoder, &mut planes)?;
        }
        decoder
            .send_eof()
            .map_err(MediaError::ffmpeg("Failed to flush audio decoder"))?;
        drain(&mut decoder, &mut planes)?;

        Ok((sample_rate, planes))
    }
}

impl VideoState {
    fn frame_secs(&self, frame: &ffmpeg::frame::Video) -> f64 {
        frame
            .timestamp()
            .or(frame.pts())
            .map(|pts| pts as f64 * self.time_base)
            .unwrap_or(self.target_secs)
    }

    /// 디코더에서 다음 프레임 (필요하면 패킷 공급, 끝나면 None)
    fn decode_next(&mut self) -> Result<Option<(f64, ffmpeg::frame::Video)>, MediaError> {
        loop {
            let mut frame = ffmpeg::frame::Video::empty();
            if self.decoder.receive_frame(&mut frame).is_ok() {
                let secs = self.frame_secs(&frame);
                return Ok(Some((secs, frame)));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let mut sent = false;
            for (stream, packet) in self.input_ctx.packets() {
                if stream.index() != self.video_stream_index {
                    continue;
                }
                // EAGAIN: 디코더 버퍼가 차 있음 → 위에서 receive 후 재시도
                if let Err(e) = self.decoder.send_packet(&packet) {
                    debug!("[DECODER] send_packet 실패: {}", e);
                }
                sent = true;
                break;
            }

            if !sent {
                // 패킷 소진 = EOF → 디코더 버퍼 비우기
                let _ = self.decoder.send_eof();
                self.eof_sent = true;
            }
        }
    }

    fn seek_to(&mut self, secs: f64) -> Result<(), MediaError> {
        // stream_index=-1 → AV_TIME_BASE(μs) 단위
        let ts_us = (secs * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        self.input_ctx
            .seek(ts_us, ..ts_us)
            .map_err(MediaError::ffmpeg("Seek failed"))?;
        self.decoder.flush();
        self.current = None;
        self.lookahead = None;
        self.converted = None;
        self.eof_sent = false;
        Ok(())
    }

    /// 목표 시각의 프레임까지 전진 (목표를 지난 첫 프레임은 lookahead로 보관)
    /// 프레임 채택 허용 오차 (소스 프레임 간격의 절반)
    fn tolerance(&self) -> f64 {
        if self.fps > 0.0 {
            0.5 / self.fps
        } else {
            0.0
        }
    }

    fn advance_to_target(&mut self) -> Result<(), MediaError> {
        let tolerance = self.tolerance();
        let target = self.target_secs;

        loop {
            let next = match self.lookahead.take() {
                Some(frame) => Some(frame),
                None => self.decode_next()?,
            };
            let Some((secs, frame)) = next else {
                // EOF: 마지막 프레임 유지
                break;
            };
            if secs > target + tolerance && self.current.is_some() {
                self.lookahead = Some((secs, frame));
                break;
            }
            self.current = Some((secs, frame));
            self.converted = None;
            if secs >= target - tolerance {
                break;
            }
        }
        Ok(())
    }

    fn scaler_for(
        &mut self,
        geometry: Geometry,
    ) -> Result<&mut ffmpeg::software::scaling::Context, MediaError> {
        let stale = !matches!(&self.scaler, Some((g, _)) if *g == geometry);
        if stale {
            let scaler = ffmpeg::software::scaling::Context::get(
                self.decoder.format(),
                self.decoder.width(),
                self.decoder.height(),
                ffmpeg::format::Pixel::YUV420P,
                geometry.width,
                geometry.height,
                ffmpeg::software::scaling::Flags::LANCZOS,
            )
            .map_err(MediaError::ffmpeg("Failed to create scaler"))?;
            self.scaler = Some((geometry, scaler));
            self.converted = None;
        }
        match &mut self.scaler {
            Some((_, scaler)) => Ok(scaler),
            None => Err(MediaError::Invalid("scaler unavailable".into())),
        }
    }

    fn convert_current(&mut self, geometry: Geometry) -> Result<PixelBuffer, MediaError> {
        if let Some(buffer) = &self.converted {
            if buffer.geometry == geometry {
                return Ok(buffer.clone());
            }
        }

        let raw = match self.current.take() {
            Some(current) => current,
            None => {
                return Err(MediaError::Invalid(format!(
                    "No frame decoded at {:.3}s",
                    self.target_secs
                )))
            }
        };
        let mut scaled = ffmpeg::frame::Video::empty();
        let result = self
            .scaler_for(geometry)
            .and_then(|scaler| {
                scaler
                    .run(&raw.1, &mut scaled)
                    .map_err(MediaError::ffmpeg("Failed to scale frame"))
            });
        self.current = Some(raw);
        result?;

        let buffer = extract_yuv420p(&scaled, geometry);
        self.converted = Some(buffer.clone());
        Ok(buffer)
    }
}

/// YUV420P 평면 복사 (stride 제거)
/// 레이아웃: [Y: w*h][U: w/2*h/2][V: w/2*h/2]
fn extract_yuv420p(frame: &ffmpeg::frame::Video, geometry: Geometry) -> PixelBuffer {
    let w = geometry.width as usize;
    let h = geometry.height as usize;
    let planes = [(0, w, h), (1, w / 2, h / 2), (2, w / 2, h / 2)];
    let mut data = Vec::with_capacity(PixelFormat::Yuv420p.buffer_len(geometry));

    for (plane, plane_w, plane_h) in planes {
        let src = frame.data(plane);
        let stride = frame.stride(plane);
        for row in 0..plane_h {
            let start = row * stride;
            match src.get(start..start + plane_w) {
                Some(line) => data.extend_from_slice(line),
                None => data.resize(data.len() + plane_w, 0),
            }
        }
    }

    PixelBuffer {
        geometry,
        format: PixelFormat::Yuv420p,
        data,
    }
}

/// 실제 seek 필요 여부
/// - 목표가 현재 프레임보다 오차 이상 앞섬 (뒤로 이동)
/// - 목표가 FORWARD_THRESHOLD_SECS 이상 멀리 있음
/// 현재 프레임에 그대로 매핑되는 목표는 디코딩 위치 유지
fn needs_seek(current_secs: Option<f64>, target_secs: f64, tolerance: f64) -> bool {
    let last = current_secs.unwrap_or(0.0);
    let behind = current_secs.map_or(false, |secs| target_secs < secs - tolerance);
    let far_ahead = target_secs - last > FORWARD_THRESHOLD_SECS;
    behind || far_ahead
}

impl MediaSource for FfmpegSource {
    fn metadata(&mut self) -> Result<SourceMetadata, BoxError> {
        Ok(self.video_mut()?.metadata)
    }

    fn seek(&mut self, timestamp_secs: f64) -> Result<(), BoxError> {
        let video = self.video_mut()?;
        let current = video.current.as_ref().map(|(secs, _)| *secs);
        let last = current.unwrap_or(0.0);

        if needs_seek(current, timestamp_secs, video.tolerance()) {
            debug!("[DECODER] seek: {:.3}s → {:.3}s", last, timestamp_secs);
            video.seek_to(timestamp_secs)?;
        }
        video.target_secs = timestamp_secs;
        Ok(())
    }

    fn sample_frame(&mut self, geometry: Geometry) -> Result<PixelBuffer, BoxError> {
        let video = self.video_mut()?;
        video.advance_to_target()?;
        Ok(video.convert_current(geometry)?)
    }

    fn decode_audio(&mut self) -> Result<AudioTrack, NoAudioTrack> {
        let (sample_rate, planes) = Self::decode_audio_planar(&self.path).map_err(|e| {
            warn!("[DECODER] 오디오 디코딩 실패: {}", e);
            NoAudioTrack::new(e.to_string())
        })?;
        AudioTrack::from_planar(sample_rate, planes)
    }
}
