//! Storage-root file access: name resolution and directory listing

mod listing;
mod path;

pub use listing::{StoredFile, list_files};
pub use path::resolve_stored_file;
