//! FFI bindings for Mihrab
//!
//! C-compatible entry points for the stateless parts of the engine. Strings are
//! null-terminated; every returned string is heap-allocated and must be freed
//! with `mihrab_free_string`. Functions returning a double report failure as
//! NaN. Either way the reason is available from `mihrab_last_error`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, NaiveDate};

use crate::bearing;
use crate::cache::cache_key;
use crate::countdown::format_countdown_secs;
use crate::error::{MihrabError, Result};
use crate::heading::heading_from_field;
use crate::resolver;
use crate::types::{Coordinate, PrayerSchedule};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Hand a string result across the boundary, recording the error on failure
fn return_string(result: Result<String>) -> *mut c_char {
    match result {
        Ok(s) => string_to_cstr(&s),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

fn return_double(result: Result<f64>) -> f64 {
    match result {
        Ok(v) => v,
        Err(e) => {
            set_last_error(&e.to_string());
            f64::NAN
        }
    }
}

fn finite(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MihrabError::InvalidAngle(format!("{name} is not a finite number")))
    }
}

// ============================================================================
// Qibla
// ============================================================================

/// Bearing and distance from a coordinate to the Kaaba as JSON.
///
/// The result looks like
/// `{"heading_degrees":null,"bearing_degrees":118.99,"distance_km":4793.8}`.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `mihrab_free_string`.
/// - Returns NULL on error; call `mihrab_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mihrab_qibla(latitude: f64, longitude: f64) -> *mut c_char {
    clear_last_error();

    return_string(Coordinate::new(latitude, longitude).and_then(|from| {
        let reading = bearing::reading_between(from, Coordinate::KAABA);
        Ok(serde_json::to_string(&reading)?)
    }))
}

/// Shortest signed rotation from `heading` to `bearing`, in [-180, 180].
///
/// # Safety
/// - Pure function; always safe to call. Returns NaN for non-finite input.
#[no_mangle]
pub unsafe extern "C" fn mihrab_rotation(heading: f64, bearing: f64) -> f64 {
    clear_last_error();

    return_double(
        finite("heading", heading)
            .and_then(|h| Ok(bearing::shortest_rotation(h, finite("bearing", bearing)?))),
    )
}

/// Compass heading in [0, 360) from horizontal magnetometer components.
///
/// # Safety
/// - Pure function; always safe to call. Returns NaN for non-finite input.
#[no_mangle]
pub unsafe extern "C" fn mihrab_heading_from_field(x: f64, y: f64) -> f64 {
    clear_last_error();

    return_double(finite("x", x).and_then(|x| Ok(heading_from_field(x, finite("y", y)?))))
}

// ============================================================================
// Prayer schedule
// ============================================================================

/// Resolve the next prayer for a schedule at a given instant.
///
/// `schedule_json` uses the provider field names
/// (`{"Fajr":"05:00","Sunrise":"06:20",...}`) and `now` is RFC 3339. Wall-clock
/// times are read in `now`'s UTC offset. Returns `{"prayer":"Isha","at":...,
/// "rolled_over":false}`.
///
/// # Safety
/// - `schedule_json` and `now` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `mihrab_free_string`.
/// - Returns NULL on error; call `mihrab_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mihrab_next_prayer(
    schedule_json: *const c_char,
    now: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let schedule_str = match cstr_to_string(schedule_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid schedule string pointer");
            return ptr::null_mut();
        }
    };

    let now_str = match cstr_to_string(now) {
        Some(s) => s,
        None => {
            set_last_error("Invalid time string pointer");
            return ptr::null_mut();
        }
    };

    return_string((|| -> Result<String> {
        let schedule = PrayerSchedule::from_json(&schedule_str)?;
        let now = DateTime::parse_from_rfc3339(now_str.trim())
            .map_err(|e| MihrabError::InvalidTime(format!("{now_str}: {e}")))?;
        let next = resolver::resolve(&schedule, &now);
        Ok(serde_json::to_string(&next)?)
    })())
}

/// Render a number of seconds as `HH:MM:SS`. Negative values render as zero.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `mihrab_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mihrab_format_countdown(secs: i64) -> *mut c_char {
    clear_last_error();
    string_to_cstr(&format_countdown_secs(secs))
}

/// Schedule cache key for a coordinate and a `YYYY-MM-DD` local date.
///
/// # Safety
/// - `date` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `mihrab_free_string`.
/// - Returns NULL on error; call `mihrab_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mihrab_cache_key(
    latitude: f64,
    longitude: f64,
    date: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let date_str = match cstr_to_string(date) {
        Some(s) => s,
        None => {
            set_last_error("Invalid date string pointer");
            return ptr::null_mut();
        }
    };

    return_string((|| -> Result<String> {
        let coordinate = Coordinate::new(latitude, longitude)?;
        let date = NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
            .map_err(|e| MihrabError::InvalidTime(format!("{date_str}: {e}")))?;
        Ok(cache_key(coordinate, date))
    })())
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Mihrab functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Mihrab function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn mihrab_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Mihrab function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn mihrab_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Mihrab library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn mihrab_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
