pub mod gate;
pub mod machine;

pub use gate::{CaptureGate, PersistEvent, PersistSink};
pub use machine::{Channel, Decision, DecisionSink, Edge, MachineState, Notification, SensorEvent, SensorMachine};
