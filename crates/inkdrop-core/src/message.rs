//! Typed records carried in the body of protocol frames.

use heapless::Vec;

use crate::{
    frame::{self, FrameError, MAX_FRAME_LEN, MacHeader, PacketKind, RawFrame, Reader},
    parts::{MASK_BYTES, PART_DATA_LEN, PartMask},
};

/// What the AP has queued for a tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ContentType {
    NoUpdate = 0,
    Image = 1,
    RawImage = 2,
    FirmwareUpdate = 3,
}

impl ContentType {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::NoUpdate),
            1 => Some(Self::Image),
            2 => Some(Self::RawImage),
            3 => Some(Self::FirmwareUpdate),
            _ => None,
        }
    }

    pub const fn is_image(self) -> bool {
        matches!(self, Self::Image | Self::RawImage)
    }
}

/// Check-in broadcast. Zero in a numeric field means "not reported".
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AvailabilityRequest {
    pub last_lqi: u8,
    pub last_rssi: i8,
    pub temperature: u8,
    pub battery_mv: u16,
    pub firmware_version: u8,
    pub hardware_type: u8,
    pub protocol_version: u8,
    pub button_pressed: bool,
}

impl AvailabilityRequest {
    pub const BODY_LEN: usize = 9;

    fn encode_body(&self) -> [u8; Self::BODY_LEN] {
        let mut body = [0u8; Self::BODY_LEN];
        body[0] = self.last_lqi;
        body[1] = self.last_rssi as u8;
        body[2] = self.temperature;
        body[3..5].copy_from_slice(&self.battery_mv.to_le_bytes());
        body[5] = self.firmware_version;
        body[6] = self.hardware_type;
        body[7] = self.protocol_version;
        body[8] = self.button_pressed as u8;
        body
    }

    fn decode_body(body: &[u8]) -> Result<Self, FrameError> {
        let mut r = fixed_reader(body, Self::BODY_LEN)?;
        Ok(Self {
            last_lqi: r.u8()?,
            last_rssi: r.u8()? as i8,
            temperature: r.u8()?,
            battery_mv: r.u16()?,
            firmware_version: r.u8()?,
            hardware_type: r.u8()?,
            protocol_version: r.u8()?,
            button_pressed: r.u8()? != 0,
        })
    }
}

/// AP answer to a check-in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AvailabilityResponse {
    pub version: u64,
    pub size: u32,
    pub content_type: ContentType,
    /// Minutes until the next check-in; 0 leaves the choice to the tag.
    pub next_check_in_minutes: u16,
}

impl AvailabilityResponse {
    pub const BODY_LEN: usize = 15;

    /// The AP's next-check-in hint, if it gave one.
    pub fn check_in_hint(&self) -> Option<u16> {
        (self.next_check_in_minutes != 0).then_some(self.next_check_in_minutes)
    }

    fn encode_body(&self) -> [u8; Self::BODY_LEN] {
        let mut body = [0u8; Self::BODY_LEN];
        body[0..8].copy_from_slice(&self.version.to_le_bytes());
        body[8..12].copy_from_slice(&self.size.to_le_bytes());
        body[12] = self.content_type.code();
        body[13..15].copy_from_slice(&self.next_check_in_minutes.to_le_bytes());
        body
    }

    fn decode_body(body: &[u8]) -> Result<Self, FrameError> {
        let mut r = fixed_reader(body, Self::BODY_LEN)?;
        Ok(Self {
            version: r.u64()?,
            size: r.u32()?,
            content_type: ContentType::from_code(r.u8()?).ok_or(FrameError::InvalidField)?,
            next_check_in_minutes: r.u16()?,
        })
    }
}

/// Request for the parts of one block that are still missing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockRequest {
    pub version: u64,
    pub block_index: u8,
    pub content_type: ContentType,
    pub parts: PartMask,
}

impl BlockRequest {
    pub const BODY_LEN: usize = 8 + 1 + 1 + MASK_BYTES;

    fn encode_body(&self) -> [u8; Self::BODY_LEN] {
        let mut body = [0u8; Self::BODY_LEN];
        body[0..8].copy_from_slice(&self.version.to_le_bytes());
        body[8] = self.block_index;
        body[9] = self.content_type.code();
        body[10..].copy_from_slice(&self.parts.to_bytes());
        body
    }

    fn decode_body(body: &[u8]) -> Result<Self, FrameError> {
        let mut r = fixed_reader(body, Self::BODY_LEN)?;
        let version = r.u64()?;
        let block_index = r.u8()?;
        let content_type = ContentType::from_code(r.u8()?).ok_or(FrameError::InvalidField)?;
        let mut mask = [0u8; MASK_BYTES];
        mask.copy_from_slice(r.take(MASK_BYTES)?);
        Ok(Self {
            version,
            block_index,
            content_type,
            parts: PartMask::from_bytes(mask),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BlockRequestAck {
    /// How long the AP needs before it starts sending parts.
    pub wait_ms: u16,
}

impl BlockRequestAck {
    pub const BODY_LEN: usize = 2;
}

/// One radio-sized fragment of a block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockPart {
    pub block_index: u8,
    pub part_index: u8,
    pub data: Vec<u8, PART_DATA_LEN>,
}

impl BlockPart {
    pub const HEADER_LEN: usize = 2;

    /// Builds a part, truncating `data` to [`PART_DATA_LEN`].
    pub fn new(block_index: u8, part_index: u8, data: &[u8]) -> Self {
        let len = data.len().min(PART_DATA_LEN);
        let mut payload = Vec::new();
        // Cannot fail: `len` never exceeds the capacity.
        let _ = payload.extend_from_slice(&data[..len]);
        Self {
            block_index,
            part_index,
            data: payload,
        }
    }

    fn decode_body(body: &[u8]) -> Result<Self, FrameError> {
        if body.len() < Self::HEADER_LEN || body.len() > Self::HEADER_LEN + PART_DATA_LEN {
            return Err(FrameError::BodyLength);
        }
        Ok(Self::new(body[0], body[1], &body[Self::HEADER_LEN..]))
    }
}

/// Every record the tag sends or understands.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Message {
    AvailabilityRequest(AvailabilityRequest),
    AvailabilityResponse(AvailabilityResponse),
    BlockRequest(BlockRequest),
    /// Same layout as [`Message::BlockRequest`]; asks only for the parts still flagged.
    PartialBlockRequest(BlockRequest),
    BlockRequestAck(BlockRequestAck),
    BlockPart(BlockPart),
    TransferComplete,
    TransferCompleteAck,
    CancelTransfer,
}

impl Message {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::AvailabilityRequest(_) => PacketKind::AvailabilityRequest,
            Self::AvailabilityResponse(_) => PacketKind::AvailabilityResponse,
            Self::BlockRequest(_) => PacketKind::BlockRequest,
            Self::PartialBlockRequest(_) => PacketKind::PartialBlockRequest,
            Self::BlockRequestAck(_) => PacketKind::BlockRequestAck,
            Self::BlockPart(_) => PacketKind::BlockPart,
            Self::TransferComplete => PacketKind::TransferComplete,
            Self::TransferCompleteAck => PacketKind::TransferCompleteAck,
            Self::CancelTransfer => PacketKind::CancelTransfer,
        }
    }

    /// Encodes the full frame for this record into `out`.
    pub fn encode_into(
        &self,
        header: &MacHeader,
        out: &mut Vec<u8, MAX_FRAME_LEN>,
    ) -> Result<(), FrameError> {
        let kind = self.kind();
        match self {
            Self::AvailabilityRequest(req) => frame::encode(header, kind, &req.encode_body(), out),
            Self::AvailabilityResponse(resp) => {
                frame::encode(header, kind, &resp.encode_body(), out)
            }
            Self::BlockRequest(req) | Self::PartialBlockRequest(req) => {
                frame::encode(header, kind, &req.encode_body(), out)
            }
            Self::BlockRequestAck(ack) => frame::encode(header, kind, &ack.wait_ms.to_le_bytes(), out),
            Self::BlockPart(part) => {
                let mut body: Vec<u8, { BlockPart::HEADER_LEN + PART_DATA_LEN }> = Vec::new();
                body.extend_from_slice(&[part.block_index, part.part_index])
                    .map_err(|_| FrameError::Overflow)?;
                body.extend_from_slice(&part.data)
                    .map_err(|_| FrameError::Overflow)?;
                frame::encode(header, kind, &body, out)
            }
            Self::TransferComplete | Self::TransferCompleteAck | Self::CancelTransfer => {
                frame::encode(header, kind, &[], out)
            }
        }
    }

    /// Interprets a checksum-verified frame body according to its type code.
    pub fn from_raw(raw: &RawFrame<'_>) -> Result<Self, FrameError> {
        let body = raw.body;
        Ok(match raw.kind {
            PacketKind::AvailabilityRequest => {
                Self::AvailabilityRequest(AvailabilityRequest::decode_body(body)?)
            }
            PacketKind::AvailabilityResponse => {
                Self::AvailabilityResponse(AvailabilityResponse::decode_body(body)?)
            }
            PacketKind::BlockRequest => Self::BlockRequest(BlockRequest::decode_body(body)?),
            PacketKind::PartialBlockRequest => {
                Self::PartialBlockRequest(BlockRequest::decode_body(body)?)
            }
            PacketKind::BlockRequestAck => {
                let mut r = fixed_reader(body, BlockRequestAck::BODY_LEN)?;
                Self::BlockRequestAck(BlockRequestAck { wait_ms: r.u16()? })
            }
            PacketKind::BlockPart => Self::BlockPart(BlockPart::decode_body(body)?),
            PacketKind::TransferComplete => {
                fixed_reader(body, 0)?;
                Self::TransferComplete
            }
            PacketKind::TransferCompleteAck => {
                fixed_reader(body, 0)?;
                Self::TransferCompleteAck
            }
            PacketKind::CancelTransfer => {
                fixed_reader(body, 0)?;
                Self::CancelTransfer
            }
        })
    }

    /// Decodes a received frame into its header and typed record.
    pub fn decode(bytes: &[u8]) -> Result<(MacHeader, Self), FrameError> {
        let raw = frame::decode(bytes)?;
        Ok((raw.header, Self::from_raw(&raw)?))
    }
}

fn fixed_reader(body: &[u8], len: usize) -> Result<Reader<'_>, FrameError> {
    if body.len() != len {
        return Err(FrameError::BodyLength);
    }
    Ok(Reader::new(body))
}
