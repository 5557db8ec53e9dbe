// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.


use crate::{
    segment::SegmentHeader,
    seq_number::SeqNumber,
};
use ::anyhow::Result;
use ::std::net::Ipv4Addr;

//=============================================================================

/// Parses a frame as seen by its receiver (`dst`).
pub fn parse_frame(src: Ipv4Addr, dst: Ipv4Addr, frame: &[u8]) -> Result<(SegmentHeader, Vec<u8>)> {
    SegmentHeader::parse(&dst, &src, frame).map_err(|e| anyhow::anyhow!("frame failed to parse: {:?}", e))
}

//=============================================================================

/// Checks for a data packet, returning its payload length.
pub fn check_packet_data(
    frame: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    seq_num: SeqNumber,
    ack_num: Option<SeqNumber>,
) -> Result<usize> {
    let (header, payload): (SegmentHeader, Vec<u8>) = parse_frame(src, dst, frame)?;
    crate::ensure_neq!(payload.len(), 0);
    crate::ensure_eq!(header.seq_num, seq_num);
    if let Some(ack_num) = ack_num {
        crate::ensure_eq!(header.ack, true);
        crate::ensure_eq!(header.ack_num, ack_num);
    }
    Ok(payload.len())
}

//=============================================================================

/// Checks for a pure ACK (no payload, no SYN/FIN/RST).
pub fn check_packet_pure_ack(frame: &[u8], src: Ipv4Addr, dst: Ipv4Addr, ack_num: SeqNumber) -> Result<()> {
    let (header, payload): (SegmentHeader, Vec<u8>) = parse_frame(src, dst, frame)?;
    crate::ensure_eq!(payload.len(), 0);
    crate::ensure_eq!(header.ack, true);
    crate::ensure_eq!(header.syn, false);
    crate::ensure_eq!(header.fin, false);
    crate::ensure_eq!(header.rst, false);
    crate::ensure_eq!(header.ack_num, ack_num);
    Ok(())
}
