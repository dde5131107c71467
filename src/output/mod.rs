//! The result artifact: structure, file naming, atomic write, run summary.

mod result;
mod summary;
mod writer;

pub use result::{CollectionResult, Invocation};
pub use summary::RunSummary;
pub use writer::{OutputError, output_file_name, write_json};
