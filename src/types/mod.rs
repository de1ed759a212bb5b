//! Shared types for Courier

pub mod descriptor;
pub mod error;
pub mod size;

pub use descriptor::{file_name_from_key, normalize_folder, FileDescriptor};
pub use error::{CourierError, Result};
pub use size::{parse_to_bytes, to_bytes, total_size_bytes, SizeError, SizeUnit};
