//! k2bridge-server: streams a multi-modal sensor device to TCP subscribers
//!
//! One broadcast channel per modality. Color, depth and infrared frames go out
//! as raw sample buffers with a trailing timestamp; body, face and audio go out
//! as newline-terminated JSON records. Audio records carry the energy of the
//! beam attributed to currently tracked bodies.

pub mod broadcast;
pub mod driver;
pub mod error;
pub mod handlers;
pub mod service;
pub mod simulator;
pub mod speech;

pub use broadcast::{BroadcastChannel, PacketSink};
pub use driver::{FrameReader, FrameReference, SensorDevice};
pub use error::{BridgeError, DriverError, HandlerError};
pub use service::{BridgeService, ServiceReport};
pub use simulator::SimulatedDevice;
