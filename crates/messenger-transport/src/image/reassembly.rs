//! Inbound image reassembly.
//!
//! Pure state machine: no I/O and no clock of its own. The receive
//! dispatcher is its only owner and feeds it one decoded packet at a time.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use messenger_core::pixels::{blocks_per_row, expected_packet_count, MAX_IMAGE_DIMENSION};
use messenger_core::{ImageDataPacket, PixelGrid, Rgba, PAYLOAD_PIXELS};

/// Identifies one logical inbound transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReassemblyKey {
    pub sender: String,
    pub filename: String,
}

/// Identifies one fragment slot within a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketKey {
    pub row: u64,
    pub offset: u64,
}

/// A completed transfer, handed to the application.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedImage {
    pub sender: String,
    pub filename: String,
    pub grid: PixelGrid,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("dimensions {width}x{height} outside 1..={}", MAX_IMAGE_DIMENSION)]
    BadDimensions { width: u64, height: u64 },

    #[error("dimensions {got_width}x{got_height} differ from transfer's {width}x{height}")]
    DimensionMismatch {
        width: u64,
        height: u64,
        got_width: u64,
        got_height: u64,
    },

    #[error("row {row} outside image of height {height}")]
    RowOutOfRange { row: u64, height: u64 },

    #[error("offset {offset} outside row of {blocks} blocks")]
    OffsetOutOfRange { offset: u64, blocks: u64 },
}

/// Outcome of feeding one packet.
#[derive(Debug)]
pub enum Accepted {
    /// New fragment recorded; transfer still incomplete.
    Stored { received: u64, expected: u64 },
    /// Fragment already held, or its transfer already completed. State
    /// untouched.
    Duplicate,
    /// This fragment completed the transfer. Only the key and dimensions
    /// are kept, so late copies are answered as duplicates.
    Completed(ReceivedImage),
    /// Never storable. State untouched.
    Rejected(RejectReason),
}

impl Accepted {
    /// Flag carried by the ack for this packet.
    pub fn ack_ok(&self) -> bool {
        !matches!(self, Accepted::Rejected(_))
    }
}

struct Assembly {
    width: u64,
    height: u64,
    expected: u64,
    fragments: HashMap<PacketKey, Box<[u32; PAYLOAD_PIXELS]>>,
    last_packet_at: Instant,
}

/// Remembered after completion until the idle timeout passes.
struct Finished {
    width: u64,
    height: u64,
    last_packet_at: Instant,
}

pub struct Reassembler {
    active: HashMap<ReassemblyKey, Assembly>,
    finished: HashMap<ReassemblyKey, Finished>,
    idle_timeout: Duration,
}

impl Reassembler {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            active: HashMap::new(),
            finished: HashMap::new(),
            idle_timeout,
        }
    }

    /// Transfers currently being assembled.
    pub fn in_progress(&self) -> usize {
        self.active.len()
    }

    /// Completed transfers still answered as duplicates.
    pub fn recently_completed(&self) -> usize {
        self.finished.len()
    }

    pub fn accept(&mut self, packet: ImageDataPacket, now: Instant) -> Accepted {
        let (width, height) = (packet.width, packet.height);
        if width == 0 || height == 0 || width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION
        {
            return Accepted::Rejected(RejectReason::BadDimensions { width, height });
        }

        let key = ReassemblyKey {
            sender: packet.sender,
            filename: packet.filename,
        };

        // The first packet of a transfer fixes its dimensions.
        if let Some(existing) = self.active.get(&key) {
            if existing.width != width || existing.height != height {
                return Accepted::Rejected(RejectReason::DimensionMismatch {
                    width: existing.width,
                    height: existing.height,
                    got_width: width,
                    got_height: height,
                });
            }
        }
        if packet.row >= height {
            return Accepted::Rejected(RejectReason::RowOutOfRange {
                row: packet.row,
                height,
            });
        }
        let blocks = blocks_per_row(width);
        if packet.offset >= blocks {
            return Accepted::Rejected(RejectReason::OffsetOutOfRange {
                offset: packet.offset,
                blocks,
            });
        }

        // Late copies of a delivered image. Different dimensions mean the
        // sender reused the name for a new image.
        if let Some(done) = self.finished.get_mut(&key) {
            if done.width == width && done.height == height {
                done.last_packet_at = now;
                return Accepted::Duplicate;
            }
            self.finished.remove(&key);
        }

        let assembly = self.active.entry(key.clone()).or_insert_with(|| Assembly {
            width,
            height,
            expected: expected_packet_count(width, height),
            fragments: HashMap::new(),
            last_packet_at: now,
        });
        assembly.last_packet_at = now;

        let slot = PacketKey {
            row: packet.row,
            offset: packet.offset,
        };
        if assembly.fragments.contains_key(&slot) {
            return Accepted::Duplicate;
        }
        assembly.fragments.insert(slot, packet.pixels);

        let received = assembly.fragments.len() as u64;
        if received < assembly.expected {
            return Accepted::Stored {
                received,
                expected: assembly.expected,
            };
        }

        self.finished.insert(
            key.clone(),
            Finished {
                width,
                height,
                last_packet_at: now,
            },
        );
        match self.active.remove(&key) {
            Some(done) => match done.into_grid() {
                Some(grid) => Accepted::Completed(ReceivedImage {
                    sender: key.sender,
                    filename: key.filename,
                    grid,
                }),
                None => Accepted::Rejected(RejectReason::BadDimensions { width, height }),
            },
            None => Accepted::Rejected(RejectReason::BadDimensions { width, height }),
        }
    }

    /// Drop transfers that have seen no packet for the idle timeout and
    /// return the incomplete ones. Completed keys expire silently.
    pub fn evict_idle(&mut self, now: Instant) -> Vec<ReassemblyKey> {
        let idle_timeout = self.idle_timeout;
        self.finished
            .retain(|_, done| now.saturating_duration_since(done.last_packet_at) < idle_timeout);
        let mut evicted = Vec::new();
        self.active.retain(|key, assembly| {
            let stale = now.saturating_duration_since(assembly.last_packet_at) >= idle_timeout;
            if stale {
                evicted.push(key.clone());
            }
            !stale
        });
        evicted
    }
}

impl Assembly {
    fn into_grid(self) -> Option<PixelGrid> {
        let width = self.width as usize;
        let mut grid = PixelGrid::new(width, self.height as usize).ok()?;
        for (slot, pixels) in self.fragments {
            let start = slot.offset as usize * PAYLOAD_PIXELS;
            // The tail of a row's last block is padding.
            let len = PAYLOAD_PIXELS.min(width - start);
            let row = grid.row_mut(slot.row as usize);
            for (dst, word) in row[start..start + len].iter_mut().zip(pixels.iter()) {
                *dst = Rgba::unpack(*word);
            }
        }
        Some(grid)
    }
}
