pub mod descriptor;
pub mod error;
pub mod logs;

pub use descriptor::{ArtifactPaths, LaunchDescriptor};
pub use error::{Error, Result};
pub use logs::{LogEntry, LogLevel, LogPipeline, LogSource};
