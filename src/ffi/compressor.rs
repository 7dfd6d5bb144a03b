// Compressor FFI - 호스트 앱 연동
// 압축 작업 생성/진행률/취소/결과/파괴

use crate::encoding::encoder::{AacEncoder, H264Encoder};
use crate::encoding::muxer::Mp4Muxer;
use crate::ffi::types::{error_kind_code, into_c_string, ErrorCode};
use crate::ffmpeg::FfmpegSource;
use crate::pipeline::job::CompressJob;
use crate::pipeline::options::CompressOptions;
use crate::pipeline::orchestrator::{Codecs, Compressor};
use crate::pipeline::resolution::Tier;
use std::ffi::{c_char, c_void, CStr};

/// env_logger 초기화 (RUST_LOG 미설정 시 info)
/// 여러 번 호출해도 안전
#[no_mangle]
pub extern "C" fn compressor_init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// 압축 시작 (백그라운드 스레드에서 실행)
/// input_path: UTF-8 인코딩된 소스 파일 경로
/// bitrate_bps: 0이면 티어 권장 범위 중간값
/// tier: 0=Original, 1=720p, 2=480p
/// fps: 0 이하면 기본값 30
/// out_job: CompressJob 핸들 반환
#[no_mangle]
pub extern "C" fn compressor_start(
    input_path: *const c_char,
    bitrate_bps: u32,
    tier: u32,
    fps: f64,
    out_job: *mut *mut c_void,
) -> i32 {
    if input_path.is_null() || out_job.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let path = match CStr::from_ptr(input_path).to_str() {
            Ok(s) => s.to_string(),
            Err(_) => return ErrorCode::InvalidParam as i32,
        };

        let tier = match Tier::from_index(tier) {
            Some(t) => t,
            None => return ErrorCode::InvalidParam as i32,
        };

        let mut options = CompressOptions::for_tier(tier);
        if bitrate_bps > 0 {
            options = options.with_bitrate(bitrate_bps);
        }
        if fps > 0.0 {
            options = options.with_frame_rate(fps);
        }
        if options.validate().is_err() {
            return ErrorCode::InvalidParam as i32;
        }
        if crate::ffmpeg::init().is_err() {
            return ErrorCode::Ffmpeg as i32;
        }

        let codecs = Codecs {
            video: H264Encoder::new(),
            audio: AacEncoder::new(),
            writer: Mp4Muxer::new(),
        };

        // CompressJob 시작 (백그라운드 스레드)
        let job = CompressJob::start(Compressor::new(options), FfmpegSource::new(path), codecs);
        *out_job = Box::into_raw(Box::new(job)) as *mut c_void;
    }

    ErrorCode::Success as i32
}

/// 진행률 가져오기 (0~100)
#[no_mangle]
pub extern "C" fn compressor_get_progress(job: *mut c_void) -> u32 {
    if job.is_null() {
        return 0;
    }

    unsafe {
        let job_ref = &*(job as *const CompressJob);
        job_ref.progress()
    }
}

/// 완료 여부 확인 (성공/실패/취소 모두 완료)
/// 반환: 1=완료, 0=진행중
#[no_mangle]
pub extern "C" fn compressor_is_finished(job: *mut c_void) -> i32 {
    if job.is_null() {
        return 1; // null이면 완료로 처리
    }

    unsafe {
        let job_ref = &*(job as *const CompressJob);
        if job_ref.is_finished() { 1 } else { 0 }
    }
}

/// 에러 메시지 가져오기
/// out_error: 에러 문자열 포인터 (없으면 null)
/// 반환 후 string_free()로 해제 필요
#[no_mangle]
pub extern "C" fn compressor_get_error(job: *mut c_void, out_error: *mut *mut c_char) -> i32 {
    if job.is_null() || out_error.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let job_ref = &*(job as *const CompressJob);
        *out_error = match job_ref.error() {
            Some(msg) => into_c_string(msg),
            None => std::ptr::null_mut(),
        };
    }

    ErrorCode::Success as i32
}

/// 에러 종류 코드
/// 반환: 0=에러 없음, 1=SourceUnreadable, 2=EncoderConfigRejected, 3=EncoderRuntimeError, 4=Cancelled
#[no_mangle]
pub extern "C" fn compressor_get_error_kind(job: *mut c_void) -> i32 {
    if job.is_null() {
        return 0;
    }

    unsafe {
        let job_ref = &*(job as *const CompressJob);
        error_kind_code(job_ref.error_kind())
    }
}

/// 취소 요청 (다음 프레임/블록 경계에서 중단, 부분 출력은 폐기)
#[no_mangle]
pub extern "C" fn compressor_cancel(job: *mut c_void) -> i32 {
    if job.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let job_ref = &*(job as *const CompressJob);
        job_ref.cancel();
    }

    ErrorCode::Success as i32
}

/// 완성된 MP4 바이트 꺼내기 (한 번만 성공)
/// out_data/out_len: compressor_free_output()으로 해제 필요
/// out_elapsed_ms: 소요 시간 (null 허용)
#[no_mangle]
pub extern "C" fn compressor_take_output(
    job: *mut c_void,
    out_data: *mut *mut u8,
    out_len: *mut usize,
    out_elapsed_ms: *mut u64,
) -> i32 {
    if job.is_null() || out_data.is_null() || out_len.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let job_ref = &*(job as *const CompressJob);
        let result = match job_ref.take_result() {
            Some(r) => r,
            None => {
                *out_data = std::ptr::null_mut();
                *out_len = 0;
                return ErrorCode::NotReady as i32;
            }
        };

        if !out_elapsed_ms.is_null() {
            *out_elapsed_ms = result.elapsed.as_millis() as u64;
        }
        let boxed = result.artifact.into_boxed_slice();
        *out_len = boxed.len();
        *out_data = Box::into_raw(boxed) as *mut u8;
    }

    ErrorCode::Success as i32
}

/// compressor_take_output으로 받은 버퍼 해제
#[no_mangle]
pub extern "C" fn compressor_free_output(data: *mut u8, len: usize) -> i32 {
    if data.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let slice = std::slice::from_raw_parts_mut(data, len);
        let _ = Box::from_raw(slice as *mut [u8]);
    }

    ErrorCode::Success as i32
}

/// CompressJob 파괴 (메모리 해제)
/// 진행 중이면 취소 요청 후 해제 (작업 스레드는 다음 경계에서 종료)
#[no_mangle]
pub extern "C" fn compressor_destroy(job: *mut c_void) -> i32 {
    if job.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let job = Box::from_raw(job as *mut CompressJob);
        if !job.is_finished() {
            job.cancel();
        }
    }

    ErrorCode::Success as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_start_rejects_null_and_bad_tier() {
        let mut job: *mut c_void = std::ptr::null_mut();
        assert_eq!(
            compressor_start(std::ptr::null(), 0, 0, 30.0, &mut job),
            ErrorCode::NullPointer as i32
        );

        let path = CString::new("/nonexistent.mp4").unwrap();
        assert_eq!(
            compressor_start(path.as_ptr(), 0, 7, 30.0, &mut job),
            ErrorCode::InvalidParam as i32
        );
        assert!(job.is_null());
    }

    #[test]
    fn test_null_job_handles() {
        let null = std::ptr::null_mut();
        assert_eq!(compressor_get_progress(null), 0);
        assert_eq!(compressor_is_finished(null), 1);
        assert_eq!(compressor_get_error_kind(null), 0);
        assert_eq!(compressor_cancel(null), ErrorCode::NullPointer as i32);
        assert_eq!(compressor_destroy(null), ErrorCode::NullPointer as i32);
    }

    #[test]
    fn test_missing_file_reports_source_unreadable() {
        let path = CString::new("/nonexistent/input.mp4").unwrap();
        let mut job: *mut c_void = std::ptr::null_mut();
        assert_eq!(compressor_start(path.as_ptr(), 0, 1, 30.0, &mut job), ErrorCode::Success as i32);

        while compressor_is_finished(job) == 0 {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(compressor_get_error_kind(job), 1);

        let mut data: *mut u8 = std::ptr::null_mut();
        let mut len = 0usize;
        assert_eq!(
            compressor_take_output(job, &mut data, &mut len, std::ptr::null_mut()),
            ErrorCode::NotReady as i32
        );
        assert_eq!(compressor_destroy(job), ErrorCode::Success as i32);
    }
}
