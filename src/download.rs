use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use futures::{Stream, StreamExt};
use log::{debug, warn};
use regex::Regex;
use tokio::{fs::File, io::AsyncWriteExt};

use crate::error::DownloadError;

static CONTENT_DISPOSITION_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).expect("valid filename regex")
});

/// A file the UI asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Resource path as found in [`crate::models::FileRecord::extension`].
    pub resource_path: String,
    pub suggested_name: String,
    /// Either the target file, or a directory to save `suggested_name` into.
    pub destination: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub path: PathBuf,
    pub bytes: u64,
}

pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    CONTENT_DISPOSITION_FILENAME
        .captures(header)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}

/// `name` with an extension for `content_type` appended when it has none.
/// Generic binary content is left alone.
pub fn with_guessed_extension(name: &str, content_type: Option<&str>) -> String {
    let Some(mime) = content_type.and_then(|ct| ct.split(';').next()).map(str::trim) else {
        return name.to_string();
    };
    if mime.eq_ignore_ascii_case("application/octet-stream") {
        return name.to_string();
    }
    let Some(guessed) = mime_guess::get_mime_extensions_str(mime).and_then(|exts| exts.first()) else {
        return name.to_string();
    };
    match Path::new(name).extension().and_then(|ext| ext.to_str()) {
        None => format!("{name}.{guessed}"),
        Some(ext) => {
            if !ext.eq_ignore_ascii_case(guessed) {
                warn!("{name} is served as {mime}, expected a .{guessed} file");
            }
            name.to_string()
        }
    }
}

/// Where the bytes end up: directories get the (server refined) name appended.
pub fn resolve_destination(destination: &Path, suggested_name: &str, served_name: Option<&str>) -> PathBuf {
    if destination.is_dir() {
        let name = served_name.unwrap_or(suggested_name);
        // Never let a served name escape the chosen directory.
        let name = Path::new(name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| suggested_name.into());
        destination.join(name)
    } else {
        destination.to_path_buf()
    }
}

/// Streams `body` into `path` and checks the byte count against `expected`.
///
/// On a mismatch the partially written file is left in place.
pub async fn write_stream<S, B, E>(
    mut body: S,
    path: &Path,
    expected: Option<u64>,
) -> Result<u64, DownloadError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    DownloadError: From<E>,
{
    let mut file = File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(chunk.as_ref()).await?;
        written += chunk.as_ref().len() as u64;
    }
    file.flush().await?;

    match expected {
        Some(expected) if expected != written => Err(DownloadError::SizeMismatch {
            expected,
            actual: written,
        }),
        Some(_) => Ok(written),
        None => {
            debug!("no Content-Length for {}, size not verified", path.display());
            Ok(written)
        }
    }
}
