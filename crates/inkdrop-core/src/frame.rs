//! IEEE 802.15.4 data-frame framing for tag <-> AP records.
//!
//! Layout:
//! - 2 bytes frame control (little endian)
//! - 1 byte sequence number
//! - 12..18 bytes addressing, depending on [`Addressing`]
//! - 1 byte packet type
//! - 1 byte checksum: 8-bit sum of the body
//! - body
//!
//! The radio appends and strips the FCS, so it never appears here.

use heapless::Vec;

/// Largest frame handed to the radio: 127-byte PSDU minus the 2-byte FCS.
pub const MAX_FRAME_LEN: usize = 125;

/// Extended (EUI-64) device address, in on-air byte order.
pub type ExtAddr = [u8; 8];

pub const BROADCAST_PAN: u16 = 0xFFFF;
pub const BROADCAST_SHORT: u16 = 0xFFFF;

const FC_FRAME_TYPE_MASK: u16 = 0b111;
const FC_FRAME_TYPE_DATA: u16 = 1;
const FC_SECURITY: u16 = 1 << 3;
const FC_FRAME_PENDING: u16 = 1 << 4;
const FC_ACK_REQUEST: u16 = 1 << 5;
const FC_PAN_COMPRESSION: u16 = 1 << 6;
const FC_DST_MODE_SHIFT: u16 = 10;
const FC_SRC_MODE_SHIFT: u16 = 14;
const ADDR_MODE_MASK: u16 = 0b11;
const ADDR_MODE_SHORT: u16 = 2;
const ADDR_MODE_EXTENDED: u16 = 3;

/// Frame control, sequence, type code and checksum bytes.
const FIXED_OVERHEAD: usize = 2 + 1 + 1 + 1;

/// Record type codes carried right after the addressing fields.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum PacketKind {
    BlockRequest = 0xE4,
    AvailabilityRequest = 0xE5,
    AvailabilityResponse = 0xE6,
    PartialBlockRequest = 0xE7,
    BlockPart = 0xE8,
    BlockRequestAck = 0xE9,
    TransferComplete = 0xEA,
    TransferCompleteAck = 0xEB,
    CancelTransfer = 0xEC,
}

impl PacketKind {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0xE4 => Self::BlockRequest,
            0xE5 => Self::AvailabilityRequest,
            0xE6 => Self::AvailabilityResponse,
            0xE7 => Self::PartialBlockRequest,
            0xE8 => Self::BlockPart,
            0xE9 => Self::BlockRequestAck,
            0xEA => Self::TransferComplete,
            0xEB => Self::TransferCompleteAck,
            0xEC => Self::CancelTransfer,
            _ => return None,
        })
    }
}

/// The three address layouts the protocol uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Addressing {
    /// Short broadcast destination, extended source, both PAN ids present.
    Broadcast {
        dst_pan: u16,
        dst_short: u16,
        src_pan: u16,
        src: ExtAddr,
    },
    /// Extended destination, short source, single (compressed) PAN id.
    Compressed {
        pan: u16,
        dst: ExtAddr,
        src_short: u16,
    },
    /// Extended destination and source, single (compressed) PAN id.
    Unicast { pan: u16, dst: ExtAddr, src: ExtAddr },
}

impl Addressing {
    const fn field_len(&self) -> usize {
        match self {
            Self::Broadcast { .. } => 2 + 2 + 2 + 8,
            Self::Compressed { .. } => 2 + 8 + 2,
            Self::Unicast { .. } => 2 + 8 + 8,
        }
    }

    const fn modes(&self) -> (u16, u16, bool) {
        match self {
            Self::Broadcast { .. } => (ADDR_MODE_SHORT, ADDR_MODE_EXTENDED, false),
            Self::Compressed { .. } => (ADDR_MODE_EXTENDED, ADDR_MODE_SHORT, true),
            Self::Unicast { .. } => (ADDR_MODE_EXTENDED, ADDR_MODE_EXTENDED, true),
        }
    }

    /// Whether a frame with this addressing is meant for `own`.
    pub fn is_addressed_to(&self, own: &ExtAddr) -> bool {
        match self {
            Self::Broadcast { dst_short, .. } => *dst_short == BROADCAST_SHORT,
            Self::Compressed { dst, .. } | Self::Unicast { dst, .. } => dst == own,
        }
    }

    /// Extended source address, when the layout carries one.
    pub fn source(&self) -> Option<ExtAddr> {
        match self {
            Self::Broadcast { src, .. } | Self::Unicast { src, .. } => Some(*src),
            Self::Compressed { .. } => None,
        }
    }

    /// PAN id the frame was sent from.
    pub fn source_pan(&self) -> u16 {
        match self {
            Self::Broadcast { src_pan, .. } => *src_pan,
            Self::Compressed { pan, .. } | Self::Unicast { pan, .. } => *pan,
        }
    }
}

/// MAC header fields the protocol cares about.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MacHeader {
    pub sequence: u8,
    pub ack_request: bool,
    pub frame_pending: bool,
    pub addressing: Addressing,
}

impl MacHeader {
    pub const fn new(sequence: u8, addressing: Addressing) -> Self {
        Self {
            sequence,
            ack_request: false,
            frame_pending: false,
            addressing,
        }
    }

    pub const fn with_ack_request(mut self, ack_request: bool) -> Self {
        self.ack_request = ack_request;
        self
    }

    fn frame_control(&self) -> u16 {
        let (dst_mode, src_mode, compressed) = self.addressing.modes();
        let mut fc = FC_FRAME_TYPE_DATA;
        if self.frame_pending {
            fc |= FC_FRAME_PENDING;
        }
        if self.ack_request {
            fc |= FC_ACK_REQUEST;
        }
        if compressed {
            fc |= FC_PAN_COMPRESSION;
        }
        fc | (dst_mode << FC_DST_MODE_SHIFT) | (src_mode << FC_SRC_MODE_SHIFT)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameError {
    /// Buffer ends before the header, type and checksum are complete.
    Truncated,
    /// Not a plain data frame, or an address layout the protocol never uses.
    Unsupported,
    UnknownKind(u8),
    Checksum,
    /// Body length does not match the record layout for its type.
    BodyLength,
    /// A field holds a value outside its enumeration.
    InvalidField,
    /// Encoded frame would not fit in [`MAX_FRAME_LEN`].
    Overflow,
}

/// A decoded frame whose checksum has been verified. The body is borrowed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RawFrame<'a> {
    pub header: MacHeader,
    pub kind: PacketKind,
    pub body: &'a [u8],
}

/// 8-bit additive checksum.
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encodes a frame into `out`, replacing its contents.
pub fn encode(
    header: &MacHeader,
    kind: PacketKind,
    body: &[u8],
    out: &mut Vec<u8, MAX_FRAME_LEN>,
) -> Result<(), FrameError> {
    out.clear();
    if FIXED_OVERHEAD + header.addressing.field_len() + body.len() > MAX_FRAME_LEN {
        return Err(FrameError::Overflow);
    }

    push(out, &header.frame_control().to_le_bytes())?;
    push(out, &[header.sequence])?;
    match &header.addressing {
        Addressing::Broadcast {
            dst_pan,
            dst_short,
            src_pan,
            src,
        } => {
            push(out, &dst_pan.to_le_bytes())?;
            push(out, &dst_short.to_le_bytes())?;
            push(out, &src_pan.to_le_bytes())?;
            push(out, src)?;
        }
        Addressing::Compressed {
            pan,
            dst,
            src_short,
        } => {
            push(out, &pan.to_le_bytes())?;
            push(out, dst)?;
            push(out, &src_short.to_le_bytes())?;
        }
        Addressing::Unicast { pan, dst, src } => {
            push(out, &pan.to_le_bytes())?;
            push(out, dst)?;
            push(out, src)?;
        }
    }
    push(out, &[kind.code(), checksum(body)])?;
    push(out, body)
}

/// Decodes and checksum-verifies a frame. Malformed input is an error, never a panic.
pub fn decode(bytes: &[u8]) -> Result<RawFrame<'_>, FrameError> {
    let mut reader = Reader::new(bytes);
    let fc = reader.u16()?;
    if fc & FC_FRAME_TYPE_MASK != FC_FRAME_TYPE_DATA || fc & FC_SECURITY != 0 {
        return Err(FrameError::Unsupported);
    }
    let sequence = reader.u8()?;

    let dst_mode = (fc >> FC_DST_MODE_SHIFT) & ADDR_MODE_MASK;
    let src_mode = (fc >> FC_SRC_MODE_SHIFT) & ADDR_MODE_MASK;
    let compressed = fc & FC_PAN_COMPRESSION != 0;
    let addressing = match (dst_mode, src_mode, compressed) {
        (ADDR_MODE_SHORT, ADDR_MODE_EXTENDED, false) => Addressing::Broadcast {
            dst_pan: reader.u16()?,
            dst_short: reader.u16()?,
            src_pan: reader.u16()?,
            src: reader.ext_addr()?,
        },
        (ADDR_MODE_EXTENDED, ADDR_MODE_SHORT, true) => Addressing::Compressed {
            pan: reader.u16()?,
            dst: reader.ext_addr()?,
            src_short: reader.u16()?,
        },
        (ADDR_MODE_EXTENDED, ADDR_MODE_EXTENDED, true) => Addressing::Unicast {
            pan: reader.u16()?,
            dst: reader.ext_addr()?,
            src: reader.ext_addr()?,
        },
        _ => return Err(FrameError::Unsupported),
    };

    let code = reader.u8()?;
    let kind = PacketKind::from_code(code).ok_or(FrameError::UnknownKind(code))?;
    let expected = reader.u8()?;
    let body = reader.rest();
    if checksum(body) != expected {
        return Err(FrameError::Checksum);
    }

    Ok(RawFrame {
        header: MacHeader {
            sequence,
            ack_request: fc & FC_ACK_REQUEST != 0,
            frame_pending: fc & FC_FRAME_PENDING != 0,
            addressing,
        },
        kind,
        body,
    })
}

fn push(out: &mut Vec<u8, MAX_FRAME_LEN>, bytes: &[u8]) -> Result<(), FrameError> {
    out.extend_from_slice(bytes).map_err(|_| FrameError::Overflow)
}

/// Bounds-checked little-endian cursor over a received buffer.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        let end = self.pos.checked_add(len).ok_or(FrameError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(FrameError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, FrameError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, FrameError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, FrameError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    pub(crate) fn ext_addr(&mut self) -> Result<ExtAddr, FrameError> {
        let mut addr = [0u8; 8];
        addr.copy_from_slice(self.take(8)?);
        Ok(addr)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = self.bytes.get(self.pos..).unwrap_or(&[]);
        self.pos = self.bytes.len();
        rest
    }
}
