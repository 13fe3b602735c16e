/// A single acquired camera frame, RGB `width*height*3` bytes.
///
/// Owned by its producer until published to the [`super::ring_buffer::RingBuffer`],
/// after which it is shared read-only; consumers that need to mutate must
/// clone.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic microseconds from the backend where available, else wall-clock.
    pub timestamp_us: i64,
    pub is_fallback: bool,
}

impl Frame {
    pub fn new(image: Vec<u8>, width: u32, height: u32, timestamp_us: i64) -> Self {
        Self {
            image,
            width,
            height,
            timestamp_us,
            is_fallback: false,
        }
    }

    /// A black `640x480` frame used by the dummy camera and as a fallback
    /// when every real acquisition strategy has failed.
    pub fn fallback(width: u32, height: u32, timestamp_us: i64) -> Self {
        Self {
            image: vec![0u8; (width * height * 3) as usize],
            width,
            height,
            timestamp_us,
            is_fallback: true,
        }
    }
}

pub fn now_us() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
