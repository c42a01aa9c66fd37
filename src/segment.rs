use crate::error::StreamError;
use crate::seq_number::SeqNum;
use crate::safe_converter::SafeCast;
use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use std::fmt::{Debug, Formatter};

bitflags! {
    #[derive(PartialEq, Eq, Copy, Clone, Debug)]
    pub struct Flags: u8 {
        const FIN = 0b0000_0001;
        const SYN = 0b0000_0010;
        const ACK = 0b0001_0000;
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct SegmentHeader {
    pub flags: Flags,
    pub seq: SeqNum,
    pub ack: SeqNum,
    /// in bytes
    pub header_len: usize,
    pub window: u16,
}
impl Debug for SegmentHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SEG{{{:?} seq={} ack={} wnd={}}}", self.flags, self.seq, self.ack, self.window)
    }
}

impl SegmentHeader {
    pub const SERIALIZED_LEN: usize = 20;

    const DATA_OFFSET_WORDS: u8 = (Self::SERIALIZED_LEN / 4) as u8;
    const ACK_FIELD_OFFSET: usize = 8;

    pub fn new(flags: Flags, seq: SeqNum, ack: SeqNum, window: u16) -> SegmentHeader {
        SegmentHeader {
            flags,
            seq,
            ack,
            header_len: Self::SERIALIZED_LEN,
            window,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u16(0);                                // source port
        buf.put_u16(0);                                // destination port
        buf.put_u32(self.seq.to_raw());
        buf.put_u32(self.ack.to_raw());
        buf.put_u8(Self::DATA_OFFSET_WORDS << 4);
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.window);
        buf.put_u16(0);                                // checksum
        buf.put_u16(0);                                // urgent pointer
    }

    pub fn deser(buf: &mut impl Buf) -> Result<SegmentHeader, StreamError> {
        let available = buf.remaining();
        if available < Self::SERIALIZED_LEN {
            return Err(StreamError::MalformedSegment { len: available });
        }

        buf.advance(4); // ports are handled by the lower layer
        let seq = SeqNum::from_raw(buf.get_u32());
        let ack = SeqNum::from_raw(buf.get_u32());
        let header_len = ((buf.get_u8() >> 4) as usize) * 4;
        let flags = Flags::from_bits_truncate(buf.get_u8());
        let window = buf.get_u16();
        buf.advance(4); // checksum, urgent pointer

        if header_len < Self::SERIALIZED_LEN || header_len > available {
            return Err(StreamError::MalformedSegment { len: available });
        }
        // skip options if a peer sent any
        buf.advance(header_len - Self::SERIALIZED_LEN);

        Ok(SegmentHeader {
            flags,
            seq,
            ack,
            header_len,
            window,
        })
    }

    /// Overwrite the acknowledgment number of an already serialized segment
    pub fn patch_ack(segment_buf: &mut [u8], ack: SeqNum) {
        segment_buf[Self::ACK_FIELD_OFFSET..Self::ACK_FIELD_OFFSET + 4]
            .copy_from_slice(&ack.to_raw().to_be_bytes());
    }
}

/// A parsed segment, borrowing its payload from the receive buffer
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Segment<'a> {
    pub header: SegmentHeader,
    pub payload: &'a [u8],
}

impl<'a> Segment<'a> {
    pub fn encode(flags: Flags, seq: SeqNum, ack: SeqNum, window: u16, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::with_capacity(SegmentHeader::SERIALIZED_LEN + payload.len());
        SegmentHeader::new(flags, seq, ack, window).ser(&mut buf);
        buf.put_slice(payload);
        buf
    }

    pub fn decode(raw: &'a [u8]) -> Result<Segment<'a>, StreamError> {
        let mut buf = raw;
        let header = SegmentHeader::deser(&mut buf)?;
        Ok(Segment {
            header,
            payload: buf,
        })
    }

    /// The number of sequence numbers this segment occupies: SYN and FIN count as one each
    pub fn seq_len(&self) -> u32 {
        seq_len(self.header.flags, self.payload.len())
    }
}

pub fn seq_len(flags: Flags, payload_len: usize) -> u32 {
    let mut result: u32 = payload_len.try_into().unwrap_or(u32::MAX);
    if flags.contains(Flags::SYN) {
        result += 1;
    }
    if flags.contains(Flags::FIN) {
        result += 1;
    }
    result
}

/// the largest payload that fits a segment with a 16 bit total length
pub fn max_payload_len() -> usize {
    <u16 as SafeCast<usize>>::safe_cast(u16::MAX) - SegmentHeader::SERIALIZED_LEN
}
