//! Streaming conversion pipeline: copy a provider's extent into a sink with
//! optional zero-skip, incremental checksums and cooperative cancellation.

mod copy;
mod error;
mod hash;
mod progress;
mod sink;

pub use copy::{copy_image, is_all_zero, CopyOptions, CopyReport, DEFAULT_CHUNK_SIZE};
pub use error::{CopyError, Result};
pub use hash::HashAlgorithm;
pub use progress::CopyProgress;
pub use sink::{CopySink, FileSink, ProviderSink};
