//! messenger-transport: peer-to-peer text and image delivery.
//!
//! Text goes over TCP, one framed message per connection. Images go over
//! UDP as acknowledged fixed-size packets. [`Transport`] ties both
//! directions together for the peer process.

pub mod image;
pub mod qos;
pub mod text;
pub mod transport;

pub use image::ReceivedImage;
pub use transport::{ListenGroup, Listening, Transport};
