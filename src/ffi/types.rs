// FFI 공용 타입 - 에러 코드 + 문자열 해제

use crate::pipeline::error::ErrorKind;
use std::ffi::{c_char, CString};

/// C ABI 반환 코드 (0=성공, 음수=오류)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    NullPointer = -1,
    InvalidParam = -2,
    /// 아직 결과 없음 (진행 중 또는 실패)
    NotReady = -3,
    /// FFmpeg 초기화 실패
    Ffmpeg = -4,
}

/// 작업 에러 종류 → C 정수 (0=에러 없음)
pub fn error_kind_code(kind: Option<ErrorKind>) -> i32 {
    kind.map_or(0, |k| k.code())
}

/// Rust String → C 문자열 (NUL 포함 시 null)
pub fn into_c_string(s: String) -> *mut c_char {
    CString::new(s).map_or(std::ptr::null_mut(), CString::into_raw)
}

/// 이 라이브러리가 할당한 문자열 해제
#[no_mangle]
pub extern "C" fn string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}
