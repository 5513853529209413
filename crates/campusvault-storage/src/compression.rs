//! Gzip compression for snapshot files

use async_trait::async_trait;
use campusvault_core::{CoreError, CoreResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Extension appended to a snapshot once compressed.
pub const GZIP_EXTENSION: &str = "gz";

/// Compression configuration
#[derive(Debug, Clone, Copy)]
pub struct CompressionConfig {
    /// Compression level (0-9, default: 6)
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: 6, // Balanced compression
        }
    }
}

impl CompressionConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.level > 9 {
            return Err(format!(
                "Invalid compression level: {} (max: 9)",
                self.level
            ));
        }
        Ok(())
    }

    /// Convert compression level to flate2::Compression
    pub fn compression_level(&self) -> Compression {
        match self.level {
            0 => Compression::none(),
            1 => Compression::fast(),
            6 => Compression::default(),
            9 => Compression::best(),
            n => Compression::new(n),
        }
    }
}

/// Compresses snapshot files in place and expands them again for restore.
///
/// `compress` must either leave a complete compressed artifact and remove the
/// original, or leave the original untouched and return an error.
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Compresses `snapshot`, returning the path of the compressed artifact.
    async fn compress(&self, snapshot: &Path) -> CoreResult<PathBuf>;

    /// Expands `compressed` into a new file at `destination`.
    async fn decompress(&self, compressed: &Path, destination: &Path) -> CoreResult<()>;
}

/// Streaming gzip compressor.
///
/// Output is deterministic: the gzip header carries no file name and a zero
/// modification time, so equal inputs produce equal archives.
#[derive(Debug, Clone, Default)]
pub struct GzipCompressor {
    config: CompressionConfig,
}

impl GzipCompressor {
    /// Create a compressor, rejecting invalid levels.
    pub fn new(config: CompressionConfig) -> CoreResult<Self> {
        config.validate().map_err(CoreError::ValidationError)?;
        Ok(Self { config })
    }

    /// Path of the compressed artifact for `snapshot`.
    #[must_use]
    pub fn compressed_path(snapshot: &Path) -> PathBuf {
        let mut name = OsString::from(snapshot.as_os_str());
        name.push(".");
        name.push(GZIP_EXTENSION);
        PathBuf::from(name)
    }
}

#[async_trait]
impl Compressor for GzipCompressor {
    async fn compress(&self, snapshot: &Path) -> CoreResult<PathBuf> {
        let source = snapshot.to_path_buf();
        let target = Self::compressed_path(snapshot);
        let staging = staging_path(&target);
        let level = self.config.compression_level();

        let result = {
            let source = source.clone();
            let staging = staging.clone();
            tokio::task::spawn_blocking(move || gzip_file(&source, &staging, level))
                .await
                .map_err(|e| CoreError::internal(format!("compression task panicked: {e}")))?
        };

        if let Err(e) = result {
            discard(&staging).await;
            return Err(CoreError::compression_failed(format!(
                "failed to compress {}: {e}",
                source.display()
            )));
        }

        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            discard(&staging).await;
            return Err(CoreError::compression_failed(format!(
                "failed to move compressed output to {}: {e}",
                target.display()
            )));
        }

        // The uncompressed file stays canonical unless it can actually be removed.
        if let Err(e) = tokio::fs::remove_file(&source).await {
            discard(&target).await;
            return Err(CoreError::compression_failed(format!(
                "failed to remove uncompressed {}: {e}",
                source.display()
            )));
        }

        Ok(target)
    }

    async fn decompress(&self, compressed: &Path, destination: &Path) -> CoreResult<()> {
        let source = compressed.to_path_buf();
        let target = destination.to_path_buf();

        let result = tokio::task::spawn_blocking(move || gunzip_file(&source, &target))
            .await
            .map_err(|e| CoreError::internal(format!("decompression task panicked: {e}")))?;

        let bytes = result.map_err(|e| {
            CoreError::compression_failed(format!(
                "failed to decompress {}: {e}",
                compressed.display()
            ))
        })?;

        tracing::debug!(
            path = %destination.display(),
            size_bytes = bytes,
            "Snapshot decompressed"
        );
        Ok(())
    }
}

fn gzip_file(source: &Path, destination: &Path, level: Compression) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(source)?);
    let writer = BufWriter::new(File::create(destination)?);
    let mut encoder = GzEncoder::new(writer, level);

    let copied = io::copy(&mut reader, &mut encoder)?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    Ok(copied)
}

fn gunzip_file(source: &Path, destination: &Path) -> io::Result<u64> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(source)?));
    let mut writer = BufWriter::new(File::create(destination)?);

    let copied = io::copy(&mut decoder, &mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    Ok(copied)
}

/// Hidden sibling used while the compressed output is being written.
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.partial-{}", Uuid::new_v4()))
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial file");
        }
    }
}
