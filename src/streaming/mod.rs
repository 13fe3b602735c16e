pub mod file;
pub mod mjpeg;
pub mod progressive;
pub mod registry;
pub mod sse;

pub use registry::{RegisteredStream, StreamKind, StreamRegistry};
pub use sse::{SensorEventBus, SensorSseEvent};
