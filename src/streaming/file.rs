use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::cache::{ImageCache, Variant};
use crate::error::{AppError, AppResult};
use crate::streaming::registry::RegisteredStream;

pub struct FileStreamResponse {
    pub body: Body,
    pub content_type: String,
}

/// Chunked byte stream for a resolved file path. If `convert=jpg` was
/// requested and the source is a BMP, the file is transcoded through the
/// image cache first and the cached JPEG is streamed instead.
pub async fn stream_file(
    path: &Path,
    convert_jpg: bool,
    cache: &Arc<ImageCache>,
    stream: RegisteredStream,
) -> AppResult<FileStreamResponse> {
    let is_bmp = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("bmp"))
        .unwrap_or(false);

    let (serve_path, content_type) = if convert_jpg && is_bmp {
        let entry = cache
            .get_or_create(path, Variant::Jpg)
            .map_err(|e| AppError::CacheIo(e.to_string()))?;
        (entry.cache_path, entry.content_type)
    } else {
        let ct = content_type_for(path);
        (path.to_path_buf(), ct)
    };

    let file = File::open(&serve_path)
        .await
        .map_err(|_| AppError::FileNotFound { attempted: vec![serve_path.clone()] })?;

    let reader = ReaderStream::new(file);
    let wrapped = async_stream::stream! {
        futures_util::pin_mut!(reader);
        while let Some(chunk) = futures_util::StreamExt::next(&mut reader).await {
            match &chunk {
                Ok(bytes) => stream.record_write(bytes.len()),
                Err(_) => stream.record_error(),
            }
            yield chunk;
        }
    };

    Ok(FileStreamResponse { body: Body::from_stream(wrapped), content_type })
}

fn content_type_for(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase().as_str() {
        "bmp" => "image/bmp",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::registry::{StreamKind, StreamRegistry};
    use axum::body::to_bytes;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn streams_raw_file_without_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.png");
        std::fs::write(&path, b"pngbytes").unwrap();
        let cache = Arc::new(ImageCache::new(dir.path().join("cache")).unwrap());

        let registry = StreamRegistry::new();
        let root = CancellationToken::new();
        let registered = registry.register(StreamKind::File, "test", &root);

        let resp = stream_file(&path, false, &cache, registered).await.unwrap();
        assert_eq!(resp.content_type, "image/png");
        let bytes = to_bytes(resp.body, usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"pngbytes");
    }
}
