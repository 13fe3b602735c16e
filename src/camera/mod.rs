pub mod driver;
pub mod frame;
pub mod manager;
pub mod ring_buffer;

pub use driver::{CameraDriver, CameraKind, CameraMode, DummyCamera, IndustrialCamera, WebcamCamera};
pub use frame::Frame;
pub use manager::CameraManager;
pub use ring_buffer::RingBuffer;
