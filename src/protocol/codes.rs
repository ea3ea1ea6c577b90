//! Error codes carried in `ERR` envelopes.
//!
//! Scripts raise these numbers from the result-encoding wrapper; anything
//! else in an `ERR` envelope is an error number raised by the interpreter
//! or by the caller's own script.

/// The script's `with timeout` block expired.
pub const TIMEOUT: i32 = 1;
/// The script body finished without returning a value.
pub const MISSING_RETURN: i32 = 2;
/// A rows script returned something that is not a list.
pub const INVALID_ROW_TYPE: i32 = 3;
/// A sections script returned something that is not a list of sections.
pub const INVALID_SECTION_TYPE: i32 = 4;
/// An action script returned an unknown action code.
pub const INVALID_ACTION_CODE: i32 = 5;
/// A scalar script returned something that cannot be coerced to text.
pub const INVALID_SCALAR_TYPE: i32 = 6;
/// Synthetic code for envelopes the codec could not read.
pub const UNPARSEABLE: i32 = -1;

/// AppleScript's own "event timed out" error number.
pub const APPLESCRIPT_TIMEOUT: i32 = -1712;
/// AppleScript's "no result was returned" error number.
pub const APPLESCRIPT_NO_RESULT: i32 = -2763;

/// Message used when an `ERR` envelope carries no message.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Canonical message for a known code.
pub fn canonical_message(code: i32) -> Option<&'static str> {
    match code {
        TIMEOUT => Some("Script execution timed out"),
        MISSING_RETURN => Some("Script did not return a value"),
        INVALID_ROW_TYPE => Some("Script must return a list of rows"),
        INVALID_SECTION_TYPE => Some("Script must return a list of sections"),
        INVALID_ACTION_CODE => Some("Script returned an invalid action code"),
        INVALID_SCALAR_TYPE => Some("Script must return text, a number or a boolean"),
        _ => None,
    }
}
