//! Messenger wire format: the bytes peers exchange directly.
//!
//! Two transports, three shapes:
//!   * TCP text frame: 64 ASCII decimal digits (zero padded) holding the
//!     payload length, followed by the UTF-8 payload.
//!   * UDP image data packet: one fixed-size record per 256-pixel block.
//!   * UDP image ack packet: one fixed-size record per acknowledged block.
//!
//! The UDP records are #[repr(C)] structs built only from byte-aligned
//! fields, so zerocopy can (de)serialize them without unsafe code and
//! without padding. Every integer is big-endian. Changing a field here
//! breaks interoperability with every other peer.

use static_assertions::assert_eq_size;
use tokio::io::{AsyncRead, AsyncReadExt};
use zerocopy::byteorder::{NetworkEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Pixels carried by every image data packet. The last block of a row is
/// padded up to this size; the padding is never read back.
pub const PAYLOAD_PIXELS: usize = 256;

/// Maximum sender username length in bytes.
pub const USERNAME_MAX_LENGTH: usize = 64;

/// Maximum filename length in bytes.
pub const FILENAME_MAX_LENGTH: usize = 64;

/// Width of the decimal length header of a text frame.
pub const TEXT_HEADER_LEN: usize = 64;

/// Largest text payload a peer will send or accept.
pub const MAX_TEXT_LEN: usize = 16 * 1024 * 1024;

/// Current image record version.
pub const WIRE_VERSION: u8 = 0x01;

/// Record tag of an image data packet.
pub const TAG_IMAGE_DATA: u8 = 0x01;

/// Record tag of an image ack packet.
pub const TAG_IMAGE_ACK: u8 = 0x02;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when producing or interpreting wire-format data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("could not read header: {0}")]
    BadHeader(String),

    #[error("short payload: expected {expected} bytes, got {got}")]
    ShortPayload { expected: usize, got: usize },

    #[error("text payload of {0} bytes exceeds maximum {}", MAX_TEXT_LEN)]
    TextTooLarge(usize),

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("datagram is {got} bytes, expected {expected}")]
    BadLength { expected: usize, got: usize },

    #[error("unknown record tag: 0x{0:02x}")]
    UnknownTag(u8),

    #[error("unknown record version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("{field} is {len} bytes, maximum is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("non-canonical {0}")]
    NonCanonical(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Text frame ────────────────────────────────────────────────────────────────

/// Encode one text frame: zero-padded decimal length header + payload.
pub fn encode_text(payload: &str) -> Result<Vec<u8>, WireError> {
    let len = payload.len();
    if len > MAX_TEXT_LEN {
        return Err(WireError::TextTooLarge(len));
    }
    let mut frame = Vec::with_capacity(TEXT_HEADER_LEN + len);
    frame.extend_from_slice(format!("{:0width$}", len, width = TEXT_HEADER_LEN).as_bytes());
    frame.extend_from_slice(payload.as_bytes());
    Ok(frame)
}

/// Parse the 64-byte decimal length header.
pub fn parse_text_header(header: &[u8; TEXT_HEADER_LEN]) -> Result<usize, WireError> {
    if !header.iter().all(u8::is_ascii_digit) {
        return Err(WireError::BadHeader("non-numeric length".into()));
    }
    // All digits, so the slice is valid ASCII.
    let digits = std::str::from_utf8(header).map_err(|_| WireError::InvalidUtf8)?;
    let len: u64 = digits
        .parse()
        .map_err(|_| WireError::BadHeader("length out of range".into()))?;
    let len = usize::try_from(len).map_err(|_| WireError::TextTooLarge(usize::MAX))?;
    if len > MAX_TEXT_LEN {
        return Err(WireError::TextTooLarge(len));
    }
    Ok(len)
}

/// Read exactly one text frame from `reader`.
pub async fn decode_text<R>(reader: &mut R) -> Result<String, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; TEXT_HEADER_LEN];
    let got = read_full(reader, &mut header).await?;
    if got < TEXT_HEADER_LEN {
        return Err(WireError::BadHeader(format!(
            "expected {TEXT_HEADER_LEN} bytes, got {got}"
        )));
    }
    let len = parse_text_header(&header)?;

    let mut payload = vec![0u8; len];
    let got = read_full(reader, &mut payload).await?;
    if got < len {
        return Err(WireError::ShortPayload { expected: len, got });
    }
    String::from_utf8(payload).map_err(|_| WireError::InvalidUtf8)
}

/// Fill `buf` until it is full or the stream ends. Returns bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

// ── Image records ─────────────────────────────────────────────────────────────

/// On-wire image data packet.
///
/// Wire size: 1188 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct ImageDataRecord {
    /// Always TAG_IMAGE_DATA.
    pub tag: u8,
    pub version: u8,
    /// Meaningful bytes of `sender`.
    pub sender_len: u8,
    /// Meaningful bytes of `filename`.
    pub filename_len: u8,
    pub sender: [u8; USERNAME_MAX_LENGTH],
    pub filename: [u8; FILENAME_MAX_LENGTH],
    /// Dimensions of the whole image, repeated in every packet.
    pub width: U64<NetworkEndian>,
    pub height: U64<NetworkEndian>,
    pub row: U64<NetworkEndian>,
    /// Block index within the row, in units of PAYLOAD_PIXELS.
    pub offset: U64<NetworkEndian>,
    /// R<<24 | G<<16 | B<<8 | A
    pub pixels: [U32<NetworkEndian>; PAYLOAD_PIXELS],
}

assert_eq_size!(ImageDataRecord, [u8; 1188]);

/// On-wire acknowledgement for one (row, offset) block.
///
/// Wire size: 152 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct ImageAckRecord {
    /// Always TAG_IMAGE_ACK.
    pub tag: u8,
    pub version: u8,
    pub sender_len: u8,
    pub filename_len: u8,
    pub sender: [u8; USERNAME_MAX_LENGTH],
    pub filename: [u8; FILENAME_MAX_LENGTH],
    pub row: U64<NetworkEndian>,
    pub offset: U64<NetworkEndian>,
    /// 0x01 = stored, 0x00 = rejected for good.
    pub ok: u8,
    /// Must be zero.
    pub reserved: [u8; 3],
}

assert_eq_size!(ImageAckRecord, [u8; 152]);

pub const IMAGE_DATA_SIZE: usize = std::mem::size_of::<ImageDataRecord>();
pub const IMAGE_ACK_SIZE: usize = std::mem::size_of::<ImageAckRecord>();

// ── Decoded forms ─────────────────────────────────────────────────────────────

/// One fragment of an image transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDataPacket {
    pub sender: String,
    pub filename: String,
    pub width: u64,
    pub height: u64,
    pub row: u64,
    pub offset: u64,
    pub pixels: Box<[u32; PAYLOAD_PIXELS]>,
}

/// Acknowledgement for one (row, offset) of one (sender, filename) transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAckPacket {
    pub sender: String,
    pub filename: String,
    pub row: u64,
    pub offset: u64,
    pub ok: bool,
}

impl ImageAckPacket {
    /// Ack echoing the identity of `packet`.
    pub fn acknowledging(packet: &ImageDataPacket, ok: bool) -> Self {
        Self {
            sender: packet.sender.clone(),
            filename: packet.filename.clone(),
            row: packet.row,
            offset: packet.offset,
            ok,
        }
    }
}

pub fn encode_image_packet(packet: &ImageDataPacket) -> Result<Vec<u8>, WireError> {
    let mut record = ImageDataRecord::new_zeroed();
    record.tag = TAG_IMAGE_DATA;
    record.version = WIRE_VERSION;
    record.sender_len = put_bounded(&mut record.sender, &packet.sender, "sender")?;
    record.filename_len = put_bounded(&mut record.filename, &packet.filename, "filename")?;
    record.width = U64::new(packet.width);
    record.height = U64::new(packet.height);
    record.row = U64::new(packet.row);
    record.offset = U64::new(packet.offset);
    for (slot, px) in record.pixels.iter_mut().zip(packet.pixels.iter()) {
        *slot = U32::new(*px);
    }
    Ok(record.as_bytes().to_vec())
}

pub fn decode_image_packet(datagram: &[u8]) -> Result<ImageDataPacket, WireError> {
    let record = ImageDataRecord::read_from(datagram).ok_or(WireError::BadLength {
        expected: IMAGE_DATA_SIZE,
        got: datagram.len(),
    })?;
    check_prefix(record.tag, record.version, TAG_IMAGE_DATA)?;

    let mut pixels = Box::new([0u32; PAYLOAD_PIXELS]);
    for (px, slot) in pixels.iter_mut().zip(record.pixels.iter()) {
        *px = slot.get();
    }

    Ok(ImageDataPacket {
        sender: take_bounded(&record.sender, record.sender_len, "sender")?,
        filename: take_bounded(&record.filename, record.filename_len, "filename")?,
        width: record.width.get(),
        height: record.height.get(),
        row: record.row.get(),
        offset: record.offset.get(),
        pixels,
    })
}

pub fn encode_ack(ack: &ImageAckPacket) -> Result<Vec<u8>, WireError> {
    let mut record = ImageAckRecord::new_zeroed();
    record.tag = TAG_IMAGE_ACK;
    record.version = WIRE_VERSION;
    record.sender_len = put_bounded(&mut record.sender, &ack.sender, "sender")?;
    record.filename_len = put_bounded(&mut record.filename, &ack.filename, "filename")?;
    record.row = U64::new(ack.row);
    record.offset = U64::new(ack.offset);
    record.ok = u8::from(ack.ok);
    Ok(record.as_bytes().to_vec())
}

pub fn decode_ack(datagram: &[u8]) -> Result<ImageAckPacket, WireError> {
    let record = ImageAckRecord::read_from(datagram).ok_or(WireError::BadLength {
        expected: IMAGE_ACK_SIZE,
        got: datagram.len(),
    })?;
    check_prefix(record.tag, record.version, TAG_IMAGE_ACK)?;

    let ok = match record.ok {
        0x00 => false,
        0x01 => true,
        _ => return Err(WireError::NonCanonical("ack flag")),
    };
    if record.reserved != [0u8; 3] {
        return Err(WireError::NonCanonical("reserved bytes"));
    }

    Ok(ImageAckPacket {
        sender: take_bounded(&record.sender, record.sender_len, "sender")?,
        filename: take_bounded(&record.filename, record.filename_len, "filename")?,
        row: record.row.get(),
        offset: record.offset.get(),
        ok,
    })
}

/// Fail fast on an over-long bounded field. Used by senders before any
/// socket is opened.
pub fn check_bounded(field: &'static str, value: &str, max: usize) -> Result<(), WireError> {
    if value.len() > max {
        return Err(WireError::FieldTooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

fn put_bounded<const N: usize>(
    slot: &mut [u8; N],
    value: &str,
    field: &'static str,
) -> Result<u8, WireError> {
    check_bounded(field, value, N)?;
    slot[..value.len()].copy_from_slice(value.as_bytes());
    // N <= 64, so the length fits.
    Ok(value.len() as u8)
}

fn take_bounded<const N: usize>(
    slot: &[u8; N],
    len: u8,
    field: &'static str,
) -> Result<String, WireError> {
    let len = len as usize;
    if len > N {
        return Err(WireError::FieldTooLong { field, len, max: N });
    }
    String::from_utf8(slot[..len].to_vec()).map_err(|_| WireError::InvalidUtf8)
}

fn check_prefix(tag: u8, version: u8, expected_tag: u8) -> Result<(), WireError> {
    if tag != expected_tag {
        return Err(WireError::UnknownTag(tag));
    }
    if version != WIRE_VERSION {
        return Err(WireError::UnknownVersion(version));
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
