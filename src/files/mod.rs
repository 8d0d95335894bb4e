//! Serving files from disk: path confinement and large-file streaming

pub mod content_type;
pub mod path_guard;
pub mod streamer;

pub use path_guard::{PathGuard, PathRejection};
pub use streamer::{FileStreamer, parse_range};
