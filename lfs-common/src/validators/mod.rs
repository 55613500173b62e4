//! Input validation functions
//!
//! Validators for the values clients send with transfer requests. The
//! service enforces them before touching the filesystem.

mod file_name;
mod md5;

pub use file_name::{FileNameError, MAX_FILE_NAME_LENGTH, validate_file_name};
pub use md5::{MD5_HEX_LENGTH, Md5Error, validate_md5};
