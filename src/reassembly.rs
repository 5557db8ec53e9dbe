// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    segment::{
        SackBlock,
        MAX_SACK_BLOCKS,
    },
    seq_number::SeqNumber,
};
use ::arrayvec::ArrayVec;
use ::std::collections::VecDeque;

//==============================================================================
// Constants
//==============================================================================

// Maximum number of out-of-order segments held at once. The sequence window
// already bounds the byte count; this bounds the entry count so a peer
// spraying 1-byte segments across the window can't bloat the store.
const MAX_OUT_OF_ORDER: usize = 16;

//==============================================================================
// Structures
//==============================================================================

/// Receive-side reassembly for one connection.
///
/// In-order data is appended to the ready queue and advances the receive
/// cursor (RCV.NXT); data arriving beyond the cursor is parked in a store
/// sorted by starting sequence number, with overlaps trimmed so the store
/// never holds the same byte twice, and is merged into the ready queue as
/// soon as the gap before it fills.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    // Sequence number of the next byte expected from the peer. RCV.NXT.
    receive_next: SeqNumber,

    // Contiguous received data awaiting pickup by the application.
    ready: VecDeque<Vec<u8>>,
    ready_bytes: usize,

    // Queue of out-of-order segments. This is where we hold onto data that we've
    // received (because it was within our receive window) but can't yet present
    // to the user because we're missing some other data that comes between this
    // and what we've already presented to the user.
    out_of_order: VecDeque<(SeqNumber, Vec<u8>)>,

    // The sequence number of the FIN, if we received it out-of-order.
    out_of_order_fin: Option<SeqNumber>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl ReassemblyBuffer {
    pub fn new(receive_next: SeqNumber) -> Self {
        Self {
            receive_next,
            ready: VecDeque::new(),
            ready_bytes: 0,
            out_of_order: VecDeque::new(),
            out_of_order_fin: None,
        }
    }

    pub fn receive_next(&self) -> SeqNumber {
        self.receive_next
    }

    /// Bytes received in order but not yet picked up by the application.
    pub fn buffered_bytes(&self) -> u32 {
        self.ready_bytes as u32
    }

    pub fn has_ready_data(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Remembers that we have received an out-of-order FIN.
    pub fn store_out_of_order_fin(&mut self, fin: SeqNumber) {
        self.out_of_order_fin = Some(fin);
    }

    /// True if a previously out-of-order FIN now sits exactly at the receive
    /// cursor, i.e. all data before it has been received.
    pub fn fin_is_next(&self) -> bool {
        self.out_of_order_fin == Some(self.receive_next)
    }

    /// Takes an incoming in-order segment and appends its data to the ready
    /// queue, then pulls in any previously out-of-order data the new segment
    /// made contiguous. The caller must have trimmed the segment so that it
    /// starts exactly at the receive cursor.
    pub fn push(&mut self, buf: Vec<u8>) {
        debug_assert!(!buf.is_empty());

        self.receive_next = self.receive_next + SeqNumber::from(buf.len() as u32);
        self.ready_bytes += buf.len();
        self.ready.push_back(buf);

        // Check if any of the formerly out-of-order data waiting in the
        // out-of-order queue is now in order. If so, move it to the ready queue.
        while let Some(stored_entry) = self.out_of_order.front() {
            if stored_entry.0 != self.receive_next {
                // The store is sorted, so the first out-of-sequence entry ends the scan.
                break;
            }
            debug!("recovering out-of-order data at {}", self.receive_next);
            if let Some((_, data)) = self.out_of_order.pop_front() {
                self.receive_next = self.receive_next + SeqNumber::from(data.len() as u32);
                self.ready_bytes += data.len();
                self.ready.push_back(data);
            }
        }
    }

    /// Takes an incoming segment that starts beyond the receive cursor and
    /// adds it to the out-of-order store. If the segment had a FIN it must
    /// have been removed prior to this routine being called.
    /// Note: since this is not the fast path, this is written for clarity over
    /// efficiency.
    pub fn store_out_of_order_segment(&mut self, mut new_start: SeqNumber, mut buf: Vec<u8>) {
        debug_assert!(!buf.is_empty());
        let mut new_end: SeqNumber = new_start + SeqNumber::from(buf.len() as u32 - 1);

        let mut action_index: usize;
        let mut another_pass_needed: bool = true;

        while another_pass_needed {
            another_pass_needed = false;

            // Find the new segment's place in the out-of-order store.
            // The store is sorted by starting sequence number and contains no duplicate data.
            action_index = self.out_of_order.len();
            for index in 0..self.out_of_order.len() {
                let (stored_start, stored_data): &(SeqNumber, Vec<u8>) = &self.out_of_order[index];
                let stored_start: SeqNumber = *stored_start;
                let stored_len: u32 = stored_data.len() as u32;
                debug_assert_ne!(stored_len, 0);
                let stored_end: SeqNumber = stored_start + SeqNumber::from(stored_len - 1);

                //
                // The new data segment has six possibilities when compared to an existing out-of-order segment:
                //
                //                                |<- out-of-order segment ->|
                //
                // |<- new before->|    |<- new front overlap ->|    |<- new end overlap ->|    |<- new after ->|
                //                                   |<- new duplicate ->|
                //                            |<- new completely encompassing ->|
                //
                if new_start < stored_start {
                    // The new segment starts before the start of this out-of-order segment.
                    if new_end < stored_start {
                        // The new segment comes completely before this out-of-order segment.
                        // Since the store is sorted, we don't need to check for overlap with any more.
                        action_index = index;
                        break;
                    }
                    if stored_end < new_end {
                        // The new segment completely encompasses the stored segment. Remove the
                        // stored segment and re-run the insertion loop, as the new segment may
                        // completely encompass even more segments.
                        another_pass_needed = true;
                        action_index = index;
                        break;
                    }
                    // The end of the new segment overlaps with the start of this out-of-order
                    // segment. Trim the end of the new segment and stop checking for overlap;
                    // the trimmed segment now sits entirely before the stored one.
                    let excess: u32 = u32::from(new_end - stored_start) + 1;
                    new_end = new_end - SeqNumber::from(excess);
                    buf.truncate(buf.len() - excess as usize);
                    action_index = index;
                    break;
                } else {
                    // The stored_start <= new_start case.
                    if new_end <= stored_end {
                        // The new segment's data is a complete duplicate of this out-of-order
                        // segment's data. Just drop the new segment.
                        return;
                    }
                    if stored_end < new_start {
                        // The new segment comes entirely after this out-of-order segment.
                        // Continue to check the next one for potential overlap.
                        continue;
                    }
                    // The new segment overlaps with the end of this out-of-order segment.
                    // Trim the beginning of the new segment and continue on to check the next one.
                    let duplicate: u32 = u32::from(stored_end - new_start) + 1;
                    new_start = new_start + SeqNumber::from(duplicate);
                    buf.drain(..duplicate as usize);
                    continue;
                }
            }

            if another_pass_needed {
                self.out_of_order.remove(action_index);
                continue;
            }

            // Insert the new segment into the correct position.
            self.out_of_order.insert(action_index, (new_start, buf));
            break;
        }

        // If the out-of-order store now contains too many entries, delete the later entries.
        while self.out_of_order.len() > MAX_OUT_OF_ORDER {
            self.out_of_order.pop_back();
        }
    }

    /// Pops up to `max_bytes` of contiguous received data for the application.
    /// Returns `None` when nothing is ready.
    pub fn pop(&mut self, max_bytes: usize) -> Option<Vec<u8>> {
        let mut buf: Vec<u8> = self.ready.pop_front()?;

        if buf.len() > max_bytes {
            let remainder: Vec<u8> = buf.split_off(max_bytes);
            self.ready.push_front(remainder);
        }
        self.ready_bytes -= buf.len();

        Some(buf)
    }

    /// Ranges of sequence space held in the out-of-order store, for SACK
    /// blocks (RFC 2018). Adjacent entries are coalesced; at most
    /// `MAX_SACK_BLOCKS` ranges are reported, most recently useful first
    /// being unnecessary here since the store is small.
    pub fn selective_ack_ranges(&self) -> ArrayVec<SackBlock, MAX_SACK_BLOCKS> {
        let mut ranges: ArrayVec<SackBlock, MAX_SACK_BLOCKS> = ArrayVec::new();

        for (start, data) in &self.out_of_order {
            let begin: SeqNumber = *start;
            let end: SeqNumber = begin + SeqNumber::from(data.len() as u32);

            match ranges.last_mut() {
                Some(last) if last.end == begin => last.end = end,
                _ => {
                    if ranges.is_full() {
                        break;
                    }
                    ranges.push(SackBlock { begin, end });
                },
            }
        }

        ranges
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::ReassemblyBuffer;
    use crate::seq_number::SeqNumber;
    use ::anyhow::Result;

    fn pop_all(rb: &mut ReassemblyBuffer) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        while let Some(buf) = rb.pop(usize::MAX) {
            out.extend_from_slice(&buf);
        }
        out
    }

    // In-order data advances the cursor and is immediately ready.
    #[test]
    fn in_order_delivery() -> Result<()> {
        let mut rb: ReassemblyBuffer = ReassemblyBuffer::new(SeqNumber::from(100));

        rb.push(vec![1, 2, 3]);
        rb.push(vec![4, 5]);
        crate::ensure_eq!(rb.receive_next(), SeqNumber::from(105));
        crate::ensure_eq!(pop_all(&mut rb), vec![1, 2, 3, 4, 5]);
        crate::ensure_eq!(rb.buffered_bytes(), 0);

        Ok(())
    }

    // A gap parks data out of order; filling the gap releases everything.
    #[test]
    fn gap_fill_releases_parked_data() -> Result<()> {
        let mut rb: ReassemblyBuffer = ReassemblyBuffer::new(SeqNumber::from(0));

        rb.store_out_of_order_segment(SeqNumber::from(3), vec![3, 4, 5]);
        crate::ensure_eq!(rb.has_ready_data(), false);

        let ranges = rb.selective_ack_ranges();
        crate::ensure_eq!(ranges.len(), 1);
        crate::ensure_eq!(ranges[0].begin, SeqNumber::from(3));
        crate::ensure_eq!(ranges[0].end, SeqNumber::from(6));

        rb.push(vec![0, 1, 2]);
        crate::ensure_eq!(rb.receive_next(), SeqNumber::from(6));
        crate::ensure_eq!(pop_all(&mut rb), vec![0, 1, 2, 3, 4, 5]);

        Ok(())
    }

    // Duplicates and overlaps never duplicate bytes in the output.
    #[test]
    fn overlap_trimming_is_idempotent() -> Result<()> {
        let mut rb: ReassemblyBuffer = ReassemblyBuffer::new(SeqNumber::from(0));

        rb.store_out_of_order_segment(SeqNumber::from(4), vec![4, 5, 6, 7]);
        // Complete duplicate: dropped.
        rb.store_out_of_order_segment(SeqNumber::from(4), vec![4, 5, 6, 7]);
        // Front overlap: only bytes 2..4 survive.
        rb.store_out_of_order_segment(SeqNumber::from(2), vec![2, 3, 4, 5]);
        // End overlap: only bytes 8..10 survive.
        rb.store_out_of_order_segment(SeqNumber::from(6), vec![6, 7, 8, 9]);

        rb.push(vec![0, 1]);
        crate::ensure_eq!(rb.receive_next(), SeqNumber::from(10));
        crate::ensure_eq!(pop_all(&mut rb), vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

        Ok(())
    }

    // A segment encompassing several smaller stored segments replaces them all.
    #[test]
    fn encompassing_segment_replaces_fragments() -> Result<()> {
        let mut rb: ReassemblyBuffer = ReassemblyBuffer::new(SeqNumber::from(0));

        rb.store_out_of_order_segment(SeqNumber::from(2), vec![2]);
        rb.store_out_of_order_segment(SeqNumber::from(4), vec![4]);
        rb.store_out_of_order_segment(SeqNumber::from(1), vec![1, 2, 3, 4, 5]);

        rb.push(vec![0]);
        crate::ensure_eq!(pop_all(&mut rb), vec![0, 1, 2, 3, 4, 5]);

        Ok(())
    }

    // Non-adjacent out-of-order islands produce one SACK block each.
    #[test]
    fn sack_ranges_reflect_islands() -> Result<()> {
        let mut rb: ReassemblyBuffer = ReassemblyBuffer::new(SeqNumber::from(0));

        rb.store_out_of_order_segment(SeqNumber::from(10), vec![0; 5]);
        rb.store_out_of_order_segment(SeqNumber::from(30), vec![0; 5]);
        // Adjacent to the first island: coalesced.
        rb.store_out_of_order_segment(SeqNumber::from(15), vec![0; 5]);

        let ranges = rb.selective_ack_ranges();
        crate::ensure_eq!(ranges.len(), 2);
        crate::ensure_eq!(ranges[0].begin, SeqNumber::from(10));
        crate::ensure_eq!(ranges[0].end, SeqNumber::from(20));
        crate::ensure_eq!(ranges[1].begin, SeqNumber::from(30));
        crate::ensure_eq!(ranges[1].end, SeqNumber::from(35));

        Ok(())
    }

    // An out-of-order FIN is only "next" once every byte before it arrived.
    #[test]
    fn out_of_order_fin_tracking() -> Result<()> {
        let mut rb: ReassemblyBuffer = ReassemblyBuffer::new(SeqNumber::from(0));

        rb.store_out_of_order_segment(SeqNumber::from(2), vec![2, 3]);
        rb.store_out_of_order_fin(SeqNumber::from(4));
        crate::ensure_eq!(rb.fin_is_next(), false);

        rb.push(vec![0, 1]);
        crate::ensure_eq!(rb.receive_next(), SeqNumber::from(4));
        crate::ensure_eq!(rb.fin_is_next(), true);

        Ok(())
    }
}
