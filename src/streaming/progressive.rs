use axum::body::{Body, Bytes};
use futures_util::Stream;
use serde_json::Value;

use crate::streaming::registry::RegisteredStream;

/// Streams a JSON array element-by-element: `[` first, each record
/// followed by `,` except the last, closed with `]`. On error mid-stream an
/// `{"error": "…"}` object is appended before the closing `]` (§4.7).
pub fn progressive_json_body(
    stream: RegisteredStream,
    items: impl Stream<Item = anyhow::Result<Value>> + Send + 'static,
) -> Body {
    let cancel = stream.cancel_token();
    let body_stream = async_stream::stream! {
        futures_util::pin_mut!(items);
        yield Ok::<_, std::io::Error>(Bytes::from_static(b"["));
        let mut first = true;
        let mut errored = false;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let Some(next) = futures_util::StreamExt::next(&mut items).await else {
                break;
            };
            match next {
                Ok(value) => {
                    let mut chunk = Vec::new();
                    if !first {
                        chunk.push(b',');
                    }
                    first = false;
                    chunk.extend_from_slice(value.to_string().as_bytes());
                    stream.record_write(chunk.len());
                    yield Ok(Bytes::from(chunk));
                }
                Err(e) => {
                    let mut chunk = Vec::new();
                    if !first {
                        chunk.push(b',');
                    }
                    first = false;
                    let err_obj = serde_json::json!({ "error": e.to_string() });
                    chunk.extend_from_slice(err_obj.to_string().as_bytes());
                    stream.record_error();
                    yield Ok(Bytes::from(chunk));
                    errored = true;
                    break;
                }
            }
        }
        let _ = errored;
        yield Ok(Bytes::from_static(b"]"));
    };

    Body::from_stream(body_stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::registry::{StreamKind, StreamRegistry};
    use axum::body::to_bytes;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn emits_bracketed_array_with_commas() {
        let registry = StreamRegistry::new();
        let root = CancellationToken::new();
        let registered = registry.register(StreamKind::Inspection, "test", &root);

        let items = futures_util::stream::iter(vec![
            Ok(serde_json::json!({"id": 1})),
            Ok(serde_json::json!({"id": 2})),
        ]);
        let body = progressive_json_body(registered, items);
        let bytes = to_bytes(body, usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text, r#"[{"id":1},{"id":2}]"#);
    }

    #[tokio::test]
    async fn appends_error_object_before_closing_bracket() {
        let registry = StreamRegistry::new();
        let root = CancellationToken::new();
        let registered = registry.register(StreamKind::Analysis, "test", &root);

        let items = futures_util::stream::iter(vec![
            Ok(serde_json::json!({"id": 1})),
            Err(anyhow::anyhow!("boom")),
        ]);
        let body = progressive_json_body(registered, items);
        let bytes = to_bytes(body, usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with(r#"[{"id":1},{"error""#));
        assert!(text.ends_with(']'));
    }
}
