use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;
use xz2::write::XzEncoder;

/// xz preset; 6 is the `xz` command-line default.
const XZ_LEVEL: u32 = 6;

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Could not create output directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("Could not write result: {0}")]
    Io(#[from] io::Error),

    #[error("Could not serialize result: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Refusing to overwrite existing output file {0}")]
    Exists(PathBuf),
}

/// `<label>-<yyyymmddThhmmssZ>-<pid>-<random>.json[.xz]`.
///
/// The pid separates concurrent processes; the random suffix separates runs of
/// one process within the same second.
pub fn output_file_name(label: &str, generated_at: &DateTime<Utc>, compressed: bool) -> String {
    format!(
        "{label}-{}-{}-{:06x}.json{}",
        generated_at.format("%Y%m%dT%H%M%SZ"),
        std::process::id(),
        fastrand::u32(..0x0100_0000),
        if compressed { ".xz" } else { "" }
    )
}

/// Serialize `value` as pretty JSON into `dir/name`, optionally xz-compressed.
///
/// Bytes go to a temporary file in `dir` that is renamed into place only after
/// everything is flushed and synced. The final name is claimed without
/// clobbering, so an existing file is never replaced. On any error the
/// temporary file is removed when dropped and nothing appears at the final path.
pub fn write_json<T: Serialize>(value: &T, dir: &Path, name: &str, compress: bool) -> Result<PathBuf, OutputError> {
    std::fs::create_dir_all(dir).map_err(|source| OutputError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(name);

    let mut tmp = tempfile::Builder::new()
        .prefix(".tally-")
        .suffix(".partial")
        .tempfile_in(dir)?;
    write_body(value, &mut tmp, compress)?;
    tmp.as_file().sync_all()?;

    tmp.persist_noclobber(&path).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            OutputError::Exists(path.clone())
        } else {
            OutputError::Io(e.error)
        }
    })?;
    debug!(path = %path.display(), compress, "result written");
    Ok(path)
}

fn write_body<T: Serialize>(value: &T, tmp: &mut NamedTempFile, compress: bool) -> Result<(), OutputError> {
    let buffered = BufWriter::new(tmp.as_file_mut());
    if compress {
        let mut encoder = XzEncoder::new(buffered, XZ_LEVEL);
        serde_json::to_writer_pretty(&mut encoder, value)?;
        encoder.finish()?.flush()?;
    } else {
        let mut buffered = buffered;
        serde_json::to_writer_pretty(&mut buffered, value)?;
        buffered.write_all(b"\n")?;
        buffered.flush()?;
    }
    Ok(())
}
