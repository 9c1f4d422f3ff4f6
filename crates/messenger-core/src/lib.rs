//! messenger-core: wire format, pixel model, errors and configuration
//! shared by the transport and the peer binary.

pub mod config;
pub mod error;
pub mod peer;
pub mod pixels;
pub mod wire;

pub use config::{MessengerConfig, TransportSettings};
pub use error::TransportError;
pub use peer::PeerRecord;
pub use pixels::{PixelGrid, Rgba};
pub use wire::{ImageAckPacket, ImageDataPacket, WireError, PAYLOAD_PIXELS};
