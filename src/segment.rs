// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    fail::Fail,
    seq_number::SeqNumber,
};
use ::arrayvec::ArrayVec;
use ::std::{
    io::{
        Cursor,
        Read,
    },
    net::Ipv4Addr,
    slice::ChunksExact,
};

//==============================================================================
// Constants
//==============================================================================

pub const MIN_SEGMENT_HEADER_SIZE: usize = 20;
pub const MAX_SEGMENT_HEADER_SIZE: usize = 60;
pub const MAX_SEGMENT_OPTIONS: usize = 5;
pub const MAX_SACK_BLOCKS: usize = 4;

/// Protocol number folded into the checksum pseudo-header.
const PROTOCOL_NUMBER: u8 = 6;

//==============================================================================
// Structures
//==============================================================================

/// One selectively-acknowledged range: [begin, end) in sequence space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SackBlock {
    pub begin: SeqNumber,
    pub end: SeqNumber,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOption {
    EndOfOptionsList,
    NoOperation,
    /// Kind 2, length 4. Only meaningful in SYN segments.
    MaximumSegmentSize(u16),
    /// Kind 3, length 3.
    WindowScale(u8),
    /// Kind 4, length 2. Only meaningful in SYN segments.
    SackPermitted,
    /// Kind 5, variable length. Up to 4 non-contiguous acknowledged ranges.
    Sack(ArrayVec<SackBlock, MAX_SACK_BLOCKS>),
    /// Kind 8, length 10. Used for RTT measurement and PAWS.
    Timestamp { value: u32, echo_reply: u32 },
}

/// A parsed (or to-be-serialized) segment header.
///
/// Wire layout: 16-bit source port, 16-bit destination port, 32-bit sequence
/// number, 32-bit acknowledgment number, 4-bit header length, 6 reserved
/// bits, 6 control flags (URG, ACK, PSH, RST, SYN, FIN), 16-bit window,
/// 16-bit checksum, 16-bit urgent pointer, then options padded to a 32-bit
/// boundary. The checksum is verified on parse and computed on serialize, so
/// it is not stored here.
#[derive(Debug, Clone)]
pub struct SegmentHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: SeqNumber,
    pub ack_num: SeqNumber,

    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,

    pub window_size: u16,
    pub urgent_pointer: u16,

    pub option_list: ArrayVec<SegmentOption, MAX_SEGMENT_OPTIONS>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl SegmentOption {
    fn compute_size(&self) -> usize {
        use SegmentOption::*;
        match self {
            EndOfOptionsList => 0,
            NoOperation => 1,
            MaximumSegmentSize(..) => 4,
            WindowScale(..) => 3,
            SackPermitted => 2,
            Sack(blocks) => 2 + 8 * blocks.len(),
            Timestamp { .. } => 10,
        }
    }

    fn serialize(&self, buf: &mut [u8]) -> usize {
        use SegmentOption::*;
        match self {
            EndOfOptionsList => 0,
            NoOperation => {
                buf[0] = 1;
                1
            },
            MaximumSegmentSize(mss) => {
                buf[0] = 2;
                buf[1] = 4;
                buf[2..4].copy_from_slice(&mss.to_be_bytes());
                4
            },
            WindowScale(scale) => {
                buf[0] = 3;
                buf[1] = 3;
                buf[2] = *scale;
                3
            },
            SackPermitted => {
                buf[0] = 4;
                buf[1] = 2;
                2
            },
            Sack(blocks) => {
                buf[0] = 5;
                buf[1] = 2 + 8 * blocks.len() as u8;
                for (i, block) in blocks.iter().enumerate() {
                    buf[(2 + 8 * i)..(2 + 8 * i + 4)].copy_from_slice(&u32::from(block.begin).to_be_bytes());
                    buf[(2 + 8 * i + 4)..(2 + 8 * i + 8)].copy_from_slice(&u32::from(block.end).to_be_bytes());
                }
                2 + 8 * blocks.len()
            },
            Timestamp { value, echo_reply } => {
                buf[0] = 8;
                buf[1] = 10;
                buf[2..6].copy_from_slice(&value.to_be_bytes());
                buf[6..10].copy_from_slice(&echo_reply.to_be_bytes());
                10
            },
        }
    }
}

impl SegmentHeader {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq_num: SeqNumber::from(0),
            ack_num: SeqNumber::from(0),

            urg: false,
            ack: false,
            psh: false,
            rst: false,
            syn: false,
            fin: false,

            window_size: 0,
            urgent_pointer: 0,
            option_list: ArrayVec::new(),
        }
    }

    /// Parses the segment header off the front of [datagram], returning the header and the payload bytes.
    /// The checksum is verified against the pseudo-header built from [local] (our address, the destination)
    /// and [remote] (the peer's address, the source); any mismatch is a [Fail] the caller silently drops on.
    pub fn parse(local: &Ipv4Addr, remote: &Ipv4Addr, datagram: &[u8]) -> Result<(Self, Vec<u8>), Fail> {
        if datagram.len() < MIN_SEGMENT_HEADER_SIZE {
            return Err(Fail::malformed_segment("segment too small"));
        }
        let data_offset: usize = (datagram[12] >> 4) as usize * 4;
        if datagram.len() < data_offset {
            return Err(Fail::malformed_segment("segment smaller than data offset"));
        }
        if data_offset < MIN_SEGMENT_HEADER_SIZE {
            return Err(Fail::malformed_segment("data offset too small"));
        }
        if data_offset > MAX_SEGMENT_HEADER_SIZE {
            return Err(Fail::malformed_segment("data offset too large"));
        }
        let (hdr_buf, data_buf): (&[u8], &[u8]) = datagram.split_at(data_offset);

        let src_port: u16 = u16::from_be_bytes([hdr_buf[0], hdr_buf[1]]);
        let dst_port: u16 = u16::from_be_bytes([hdr_buf[2], hdr_buf[3]]);

        let seq_num: SeqNumber = SeqNumber::from(u32::from_be_bytes([hdr_buf[4], hdr_buf[5], hdr_buf[6], hdr_buf[7]]));
        let ack_num: SeqNumber =
            SeqNumber::from(u32::from_be_bytes([hdr_buf[8], hdr_buf[9], hdr_buf[10], hdr_buf[11]]));

        let urg: bool = (hdr_buf[13] & (1 << 5)) != 0;
        let ack: bool = (hdr_buf[13] & (1 << 4)) != 0;
        let psh: bool = (hdr_buf[13] & (1 << 3)) != 0;
        let rst: bool = (hdr_buf[13] & (1 << 2)) != 0;
        let syn: bool = (hdr_buf[13] & (1 << 1)) != 0;
        let fin: bool = (hdr_buf[13] & (1 << 0)) != 0;

        let window_size: u16 = u16::from_be_bytes([hdr_buf[14], hdr_buf[15]]);

        let checksum: u16 = u16::from_be_bytes([hdr_buf[16], hdr_buf[17]]);
        if checksum != segment_checksum(remote, local, hdr_buf, data_buf) {
            return Err(Fail::malformed_segment("checksum mismatch"));
        }

        let urgent_pointer: u16 = u16::from_be_bytes([hdr_buf[18], hdr_buf[19]]);

        let mut option_list: ArrayVec<SegmentOption, MAX_SEGMENT_OPTIONS> = ArrayVec::new();

        if data_offset > MIN_SEGMENT_HEADER_SIZE {
            let mut option_rdr: Cursor<&[u8]> = Cursor::new(&hdr_buf[MIN_SEGMENT_HEADER_SIZE..data_offset]);
            while (option_rdr.position() as usize) < data_offset - MIN_SEGMENT_HEADER_SIZE {
                let mut temp: [u8; 1] = [0; 1];
                option_rdr.read_exact(&mut temp)?;
                let option_kind: u8 = temp[0];
                let option: SegmentOption = match option_kind {
                    0 => break,
                    1 => continue,
                    2 => {
                        let mut temp: [u8; 1] = [0; 1];
                        option_rdr.read_exact(&mut temp)?;
                        if temp[0] != 4 {
                            return Err(Fail::malformed_segment("MSS option length was not 4"));
                        }
                        let mut temp: [u8; 2] = [0; 2];
                        option_rdr.read_exact(&mut temp)?;
                        SegmentOption::MaximumSegmentSize(u16::from_be_bytes(temp))
                    },
                    3 => {
                        let mut temp: [u8; 1] = [0; 1];
                        option_rdr.read_exact(&mut temp)?;
                        if temp[0] != 3 {
                            return Err(Fail::malformed_segment("window scale option length was not 3"));
                        }
                        option_rdr.read_exact(&mut temp)?;
                        SegmentOption::WindowScale(temp[0])
                    },
                    4 => {
                        let mut temp: [u8; 1] = [0; 1];
                        option_rdr.read_exact(&mut temp)?;
                        if temp[0] != 2 {
                            return Err(Fail::malformed_segment("SACK-permitted option length was not 2"));
                        }
                        SegmentOption::SackPermitted
                    },
                    5 => {
                        let mut temp: [u8; 1] = [0; 1];
                        option_rdr.read_exact(&mut temp)?;
                        let num_blocks: usize = match temp[0] {
                            10 | 18 | 26 | 34 => (temp[0] as usize - 2) / 8,
                            _ => return Err(Fail::malformed_segment("invalid SACK option length")),
                        };
                        let mut blocks: ArrayVec<SackBlock, MAX_SACK_BLOCKS> = ArrayVec::new();
                        for _ in 0..num_blocks {
                            let mut temp: [u8; 4] = [0; 4];
                            option_rdr.read_exact(&mut temp)?;
                            let begin: SeqNumber = SeqNumber::from(u32::from_be_bytes(temp));
                            option_rdr.read_exact(&mut temp)?;
                            let end: SeqNumber = SeqNumber::from(u32::from_be_bytes(temp));
                            blocks.push(SackBlock { begin, end });
                        }
                        SegmentOption::Sack(blocks)
                    },
                    8 => {
                        let mut temp: [u8; 1] = [0; 1];
                        option_rdr.read_exact(&mut temp)?;
                        if temp[0] != 10 {
                            return Err(Fail::malformed_segment("timestamp option length was not 10"));
                        }
                        let mut temp: [u8; 4] = [0; 4];
                        option_rdr.read_exact(&mut temp)?;
                        let value: u32 = u32::from_be_bytes(temp);
                        option_rdr.read_exact(&mut temp)?;
                        let echo_reply: u32 = u32::from_be_bytes(temp);
                        SegmentOption::Timestamp { value, echo_reply }
                    },
                    _ => return Err(Fail::malformed_segment("invalid segment option")),
                };
                if option_list.is_full() {
                    return Err(Fail::malformed_segment("too many segment options provided"));
                }
                option_list.push(option);
            }
        }

        let header: Self = Self {
            src_port,
            dst_port,
            seq_num,
            ack_num,
            urg,
            ack,
            psh,
            rst,
            syn,
            fin,
            window_size,
            urgent_pointer,
            option_list,
        };
        Ok((header, data_buf.to_vec()))
    }

    /// Serializes this header plus [payload] into one datagram, checksummed over the pseudo-header
    /// built from [src] and [dst].
    pub fn serialize(&self, src: &Ipv4Addr, dst: &Ipv4Addr, payload: &[u8]) -> Vec<u8> {
        let header_bytes: usize = self.compute_size();
        let mut datagram: Vec<u8> = vec![0u8; header_bytes + payload.len()];
        datagram[header_bytes..].copy_from_slice(payload);
        let (hdr_buf, data_buf): (&mut [u8], &mut [u8]) = datagram.split_at_mut(header_bytes);

        hdr_buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        hdr_buf[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        hdr_buf[4..8].copy_from_slice(&u32::from(self.seq_num).to_be_bytes());
        hdr_buf[8..12].copy_from_slice(&u32::from(self.ack_num).to_be_bytes());
        hdr_buf[12] = ((header_bytes / 4) as u8) << 4;
        hdr_buf[13] = 0;
        if self.urg {
            hdr_buf[13] |= 1 << 5;
        }
        if self.ack {
            hdr_buf[13] |= 1 << 4;
        }
        if self.psh {
            hdr_buf[13] |= 1 << 3;
        }
        if self.rst {
            hdr_buf[13] |= 1 << 2;
        }
        if self.syn {
            hdr_buf[13] |= 1 << 1;
        }
        if self.fin {
            hdr_buf[13] |= 1 << 0;
        }

        hdr_buf[14..16].copy_from_slice(&self.window_size.to_be_bytes());

        // The checksum (bytes 16..18) is written last.

        hdr_buf[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());

        let mut cur_pos: usize = MIN_SEGMENT_HEADER_SIZE;
        for option in &self.option_list {
            cur_pos += option.serialize(&mut hdr_buf[cur_pos..]);
        }
        // Terminate the list if we had options. The remainder of the padding is already zero.
        if !self.option_list.is_empty() && cur_pos < header_bytes {
            hdr_buf[cur_pos] = 0;
        }

        let checksum: u16 = segment_checksum(src, dst, hdr_buf, data_buf);
        hdr_buf[16..18].copy_from_slice(&checksum.to_be_bytes());

        datagram
    }

    /// Header size on the wire, rounded up to a 32-bit boundary.
    pub fn compute_size(&self) -> usize {
        let mut size: usize = MIN_SEGMENT_HEADER_SIZE;
        for option in &self.option_list {
            size += option.compute_size();
        }
        if !self.option_list.is_empty() {
            // One byte for the end-of-options-list marker.
            size += 1;
        }
        (size + 3) & !0x3
    }

    pub fn iter_options(&self) -> impl Iterator<Item = &SegmentOption> {
        self.option_list.iter()
    }

    pub fn push_option(&mut self, option: SegmentOption) {
        self.option_list.push(option);
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Ones-complement checksum over a pseudo-header (source address, destination
/// address, zero byte, protocol number, segment length) followed by the
/// segment header and payload.
fn segment_checksum(src: &Ipv4Addr, dst: &Ipv4Addr, header: &[u8], data: &[u8]) -> u16 {
    let mut state: u32 = 0xffff;

    let src_octets: [u8; 4] = src.octets();
    state += u16::from_be_bytes([src_octets[0], src_octets[1]]) as u32;
    state += u16::from_be_bytes([src_octets[2], src_octets[3]]) as u32;

    let dst_octets: [u8; 4] = dst.octets();
    state += u16::from_be_bytes([dst_octets[0], dst_octets[1]]) as u32;
    state += u16::from_be_bytes([dst_octets[2], dst_octets[3]]) as u32;

    state += u16::from_be_bytes([0, PROTOCOL_NUMBER]) as u32;
    state += (header.len() + data.len()) as u32;

    // The fixed-length part of the header, with the checksum field itself taken as zero.
    for (i, chunk) in header[..MIN_SEGMENT_HEADER_SIZE].chunks_exact(2).enumerate() {
        if i == 8 {
            continue;
        }
        state += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }

    // Options are padded to a 32-bit boundary, so there is no remainder here.
    if header.len() > MIN_SEGMENT_HEADER_SIZE {
        for chunk in header[MIN_SEGMENT_HEADER_SIZE..].chunks_exact(2) {
            state += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        }
    }

    let mut chunks_iter: ChunksExact<u8> = data.chunks_exact(2);
    while let Some(chunk) = chunks_iter.next() {
        state += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    // The payload may have an odd number of bytes; pad the last one with zero.
    if let Some(&b) = chunks_iter.remainder().first() {
        state += u16::from_be_bytes([b, 0]) as u32;
    }

    // A u32 accumulator would need 2^16 additions to overflow, which is well
    // beyond the largest segment, so folding once at the end suffices.
    while state > 0xffff {
        state -= 0xffff;
    }
    !state as u16
}

//==============================================================================
// Unit Tests
//==============================================================================
