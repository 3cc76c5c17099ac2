//! Raw SQLite bindings and small helpers around them.

pub use libsqlite3_sys::*;

use std::ffi::{CStr, c_int};

// libsqlite3-sys omits sqlite3_close_v2 from its generated bindings; the
// symbol is still exported by the bundled SQLite library.
unsafe extern "C" {
    pub fn sqlite3_close_v2(db: *mut sqlite3) -> c_int;
}

/// Convert an SQLite result code to a human-readable string.
pub fn error_string(code: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a pointer to a static, NUL-terminated string
    unsafe {
        let ptr = sqlite3_errstr(code);
        if ptr.is_null() {
            return "unknown error".to_string();
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// The SQLite library version.
pub fn version() -> String {
    // SAFETY: sqlite3_libversion returns a pointer to a static string
    unsafe { CStr::from_ptr(sqlite3_libversion()).to_string_lossy().into_owned() }
}

/// The SQLite library version number (e.g. 3045000 for 3.45.0).
pub fn version_number() -> i32 {
    // SAFETY: no preconditions
    unsafe { sqlite3_libversion_number() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_string() {
        assert_eq!(error_string(SQLITE_OK), "not an error");
        assert_eq!(error_string(SQLITE_CONSTRAINT), "constraint failed");
    }

    #[test]
    fn test_version() {
        assert!(version().starts_with('3'));
        assert!(version_number() >= 3_000_000);
    }
}
