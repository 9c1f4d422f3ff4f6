//! Image delivery over UDP.
//!
//! Images travel as fixed-size packets of PAYLOAD_PIXELS pixels, one ack
//! per packet. The sender retries unacknowledged packets; the receiver
//! absorbs duplicates and emits an image once every block has arrived.

mod ack;
pub mod reassembly;
pub mod receive;
pub mod send;

pub use reassembly::{Accepted, PacketKey, ReassemblyKey, Reassembler, ReceivedImage, RejectReason};
pub use receive::ImageListener;
pub use send::{fragment, send_image, send_image_with_shutdown};
