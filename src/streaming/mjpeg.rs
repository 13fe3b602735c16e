use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use image::codecs::jpeg::JpegEncoder;
use image::ImageEncoder;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::camera::{CameraManager, Frame, RingBuffer};
use crate::streaming::registry::RegisteredStream;

const BOUNDARY: &str = "frame";
const MAX_CONSECUTIVE_FAILURES: u32 = 5;
const HEARTBEAT_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// `multipart/x-mixed-replace` body at `frame_rate` FPS (1..30) and JPEG
/// `quality` (10..100). Reads from the ring buffer if continuous mode is in
/// use, else polls the camera manager directly. A bounded (capacity 1)
/// channel enforces the "never buffer unboundedly" rule: if the send blocks
/// past `slow_client_timeout` the producer closes the stream.
pub fn mjpeg_body(
    camera: Arc<CameraManager>,
    ring: Option<Arc<RingBuffer>>,
    stream: RegisteredStream,
    frame_rate: u32,
    quality: u32,
    slow_client_timeout: Duration,
) -> Body {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(1);
    let cancel = stream.cancel_token();
    let frame_rate = frame_rate.clamp(1, 30);
    let quality = quality.clamp(10, 100) as u8;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / frame_rate as f64));
        let mut consecutive_failures = 0u32;
        let mut last_heartbeat = Instant::now() - HEARTBEAT_MIN_INTERVAL;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("mjpeg stream cancelled");
                    break;
                }
                _ = interval.tick() => {}
            }

            let frame = match &ring {
                Some(rb) => rb.latest().map(|arc| (*arc).clone()),
                // get_frame() can sleep for a reconnect attempt; keep that off
                // the reactor thread.
                None => tokio::task::block_in_place(|| {
                    camera.with_driver(|d| d.get_frame()).flatten()
                }),
            };

            let chunk = match frame {
                Some(frame) => {
                    consecutive_failures = 0;
                    match encode_multipart_chunk(&frame, quality) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!(error = %e, "jpeg encode failed, skipping frame");
                            stream.record_error();
                            continue;
                        }
                    }
                }
                None => {
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        debug!("mjpeg stream closing after 5 consecutive empty frames");
                        break;
                    }
                    if last_heartbeat.elapsed() < HEARTBEAT_MIN_INTERVAL {
                        continue;
                    }
                    last_heartbeat = Instant::now();
                    Bytes::from(format!("--{BOUNDARY}\r\nX-Heartbeat: {consecutive_failures}\r\n\r\n"))
                }
            };

            let len = chunk.len();
            match tokio::time::timeout(slow_client_timeout, tx.send(Ok(chunk))).await {
                Ok(Ok(())) => stream.record_write(len),
                Ok(Err(_)) => {
                    debug!("mjpeg client disconnected");
                    break;
                }
                Err(_) => {
                    warn!("mjpeg client write blocked past timeout, classifying as slow");
                    stream.record_error();
                    break;
                }
            }
        }
    });

    Body::from_stream(ReceiverStream::new(rx))
}

fn encode_multipart_chunk(frame: &Frame, quality: u8) -> anyhow::Result<Bytes> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(Cursor::new(&mut jpeg), quality).write_image(
        &frame.image,
        frame.width,
        frame.height,
        image::ExtendedColorType::Rgb8,
    )?;

    let mut out = Vec::with_capacity(jpeg.len() + 128);
    out.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            jpeg.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(&jpeg);
    out.extend_from_slice(b"\r\n");
    Ok(Bytes::from(out))
}

pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={BOUNDARY}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::frame::now_us;

    #[test]
    fn encodes_valid_multipart_chunk_with_headers() {
        let frame = Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, now_us());
        let chunk = encode_multipart_chunk(&frame, 80).unwrap();
        let text_prefix = String::from_utf8_lossy(&chunk[..40]);
        assert!(text_prefix.contains("Content-Type: image/jpeg"));
        assert!(chunk.ends_with(b"\r\n"));
    }

    #[test]
    fn content_type_matches_boundary() {
        assert_eq!(content_type(), "multipart/x-mixed-replace; boundary=frame");
    }
}
