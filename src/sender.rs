// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    fail::Fail,
    rto::RtoCalculator,
    seq_number::SeqNumber,
};
use ::std::{
    collections::VecDeque,
    fmt,
    time::Instant,
};

//==============================================================================
// Structures
//==============================================================================

/// Entry on the unacknowledged (retransmission) queue.
///
/// A zero-length `bytes` entry is the end-of-send marker: it stands for our
/// FIN and occupies one unit of sequence space.
pub struct UnackedSegment {
    pub bytes: Vec<u8>,
    // Set to `None` on retransmission to implement Karn's algorithm.
    pub initial_tx: Option<Instant>,
}

pub struct Sender {
    //
    // Send Sequence Space:
    //
    //                     |<-----------------send window size----------------->|
    //                     |                                                    |
    //                send_unacked               send_next         send_unacked + send window
    //                     v                         v                          v
    // ... ----------------|-------------------------|--------------------------|--------------------------------
    //       acknowledged  |      unacknowledged     |     allowed to send      |  future sequence number space
    //
    // Note: In RFC 793 terminology, send_unacked is SND.UNA, send_next is SND.NXT, and "send window" is SND.WND.
    //

    // Sequence number of the oldest byte of unacknowledged sent data. SND.UNA.
    send_unacked: SeqNumber,

    // Queue of unacknowledged sent data. RFC 793 calls this the "retransmission queue".
    unacked_queue: VecDeque<UnackedSegment>,

    // Sequence number of the next data to be sent. SND.NXT.
    send_next: SeqNumber,

    // User data we have accepted but do not yet have window to send.
    unsent_queue: VecDeque<Vec<u8>>,
    unsent_bytes: usize,

    // Bound on unsent_bytes; sends beyond it are refused with EAGAIN.
    send_buffer_size: usize,

    // Maximum Segment Size currently in use for this connection.
    mss: usize,
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Sender")
            .field("send_unacked", &self.send_unacked)
            .field("send_next", &self.send_next)
            .field("unsent_bytes", &self.unsent_bytes)
            .field("mss", &self.mss)
            .finish()
    }
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Sender {
    pub fn new(seq_no: SeqNumber, mss: usize, send_buffer_size: usize) -> Self {
        Self {
            send_unacked: seq_no,
            unacked_queue: VecDeque::new(),
            send_next: seq_no,
            unsent_queue: VecDeque::new(),
            unsent_bytes: 0,
            send_buffer_size,
            mss,
        }
    }

    pub fn get_mss(&self) -> usize {
        self.mss
    }

    pub fn get_send_unacked(&self) -> SeqNumber {
        self.send_unacked
    }

    pub fn get_send_next(&self) -> SeqNumber {
        self.send_next
    }

    pub fn modify_send_next(&mut self, f: impl FnOnce(SeqNumber) -> SeqNumber) {
        self.send_next = f(self.send_next);
    }

    /// Bytes sent but not yet acknowledged (SND.NXT - SND.UNA).
    pub fn flight_size(&self) -> u32 {
        (self.send_next - self.send_unacked).into()
    }

    pub fn has_unacked_data(&self) -> bool {
        !self.unacked_queue.is_empty()
    }

    /// Accepts application data into the bounded send buffer. Returns the
    /// number of bytes accepted, which may be less than `buf.len()` if the
    /// buffer is nearly full, or EAGAIN if there is no room at all.
    pub fn push_unsent(&mut self, buf: &[u8]) -> Result<usize, Fail> {
        let available: usize = self.send_buffer_size.saturating_sub(self.unsent_bytes);
        if available == 0 {
            return Err(Fail::buffer_full("send buffer is full"));
        }

        let accepted: usize = usize::min(buf.len(), available);
        self.unsent_queue.push_back(buf[..accepted].to_vec());
        self.unsent_bytes += accepted;
        Ok(accepted)
    }

    /// Queues the end-of-send marker. All data already accepted still drains
    /// ahead of it.
    pub fn push_fin_marker(&mut self) {
        self.unsent_queue.push_back(Vec::new());
    }

    /// Pops up to `max_bytes` from the unsent queue for transmission.
    /// A returned empty buffer is the end-of-send (FIN) marker.
    pub fn pop_unsent(&mut self, max_bytes: usize) -> Option<Vec<u8>> {
        let mut buf: Vec<u8> = self.unsent_queue.pop_front()?;

        if buf.len() > max_bytes {
            if max_bytes == 0 {
                self.unsent_queue.push_front(buf);
                return None;
            }
            let remainder: Vec<u8> = buf.split_off(max_bytes);
            self.unsent_queue.push_front(remainder);
        }
        self.unsent_bytes -= buf.len();

        Some(buf)
    }

    /// Pops a single byte off the unsent queue, for use as a zero-window probe.
    pub fn pop_one_unsent_byte(&mut self) -> Option<Vec<u8>> {
        // The FIN marker is empty and cannot yield a probe byte.
        if self.unsent_queue.front()?.is_empty() {
            return None;
        }
        self.pop_unsent(1)
    }

    /// Size of the buffer at the head of the unsent queue, if any.
    pub fn top_size_unsent(&self) -> Option<usize> {
        Some(self.unsent_queue.front()?.len())
    }

    pub fn push_unacked_segment(&mut self, segment: UnackedSegment) {
        self.unacked_queue.push_back(segment);
    }

    /// Hands out the oldest unacknowledged segment for retransmission. Its
    /// first-transmission timestamp is cleared so the eventual ACK is never
    /// used as an RTT sample (Karn's algorithm).
    pub fn retransmission_data(&mut self) -> Option<(SeqNumber, Vec<u8>)> {
        let segment: &mut UnackedSegment = self.unacked_queue.front_mut()?;
        segment.initial_tx = None;
        Some((self.send_unacked, segment.bytes.clone()))
    }

    /// Removes acknowledged data from the unacknowledged (a.k.a.
    /// retransmission) queue, advancing SND.UNA and feeding untainted RTT
    /// samples to the RTO calculator.
    pub fn remove_acknowledged_data(&mut self, bytes_acknowledged: u32, now: Instant, rto: &mut RtoCalculator) {
        let mut bytes_remaining: usize = bytes_acknowledged as usize;

        while bytes_remaining != 0 {
            if let Some(segment) = self.unacked_queue.front_mut() {
                // In the case of repacketization, an ACK for the first byte is enough for the time sample.
                if let Some(initial_tx) = segment.initial_tx {
                    rto.add_sample(now - initial_tx);
                }

                if segment.bytes.len() > bytes_remaining {
                    // Only some of the data in this segment has been acked. Remove just the
                    // acked amount and leave the segment on the queue.
                    segment.bytes.drain(..bytes_remaining);
                    segment.initial_tx = None;
                    break;
                }

                if segment.bytes.is_empty() {
                    // This entry is the end-of-send marker, covering exactly our FIN.
                    debug_assert_eq!(bytes_remaining, 1);
                    bytes_remaining = 0;
                } else {
                    bytes_remaining -= segment.bytes.len();
                }
            } else {
                debug_assert!(false); // Shouldn't have bytes_remaining with no segments on the queue.
                break;
            }

            self.unacked_queue.pop_front();
        }

        self.send_unacked = self.send_unacked + SeqNumber::from(bytes_acknowledged);
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{
        Sender,
        UnackedSegment,
    };
    use crate::{
        rto::RtoCalculator,
        seq_number::SeqNumber,
    };
    use ::anyhow::Result;
    use ::std::time::{
        Duration,
        Instant,
    };

    // The bounded send buffer accepts partial writes and refuses when full.
    #[test]
    fn bounded_send_buffer() -> Result<()> {
        let mut sender: Sender = Sender::new(SeqNumber::from(1), 1450, 10);

        crate::ensure_eq!(sender.push_unsent(&[0u8; 8])?, 8);
        crate::ensure_eq!(sender.push_unsent(&[0u8; 8])?, 2);
        crate::ensure_eq!(sender.push_unsent(&[0u8; 1]).is_err(), true);

        // Draining frees space.
        crate::ensure_eq!(sender.pop_unsent(10).map(|b| b.len()), Some(8));
        crate::ensure_eq!(sender.push_unsent(&[0u8; 8])?, 8);

        Ok(())
    }

    // Partial acknowledgment trims the front segment and disqualifies it as
    // an RTT sample source.
    #[test]
    fn partial_ack_trims_front_segment() -> Result<()> {
        let now: Instant = Instant::now();
        let mut sender: Sender = Sender::new(SeqNumber::from(100), 1450, 4096);
        let mut rto: RtoCalculator = RtoCalculator::new();

        sender.modify_send_next(|s| s + SeqNumber::from(10));
        sender.push_unacked_segment(UnackedSegment {
            bytes: vec![0u8; 10],
            initial_tx: Some(now),
        });

        sender.remove_acknowledged_data(4, now + Duration::from_millis(200), &mut rto);
        crate::ensure_eq!(sender.get_send_unacked(), SeqNumber::from(104));
        crate::ensure_eq!(sender.flight_size(), 6);
        // The first 4 bytes produced a sample: RTO = 3 * 200ms.
        crate::ensure_eq!(rto.rto(), Duration::from_millis(600));

        // Acknowledge the rest; the trimmed segment must not produce another sample.
        sender.remove_acknowledged_data(6, now + Duration::from_secs(30), &mut rto);
        crate::ensure_eq!(sender.get_send_unacked(), SeqNumber::from(110));
        crate::ensure_eq!(sender.flight_size(), 0);
        crate::ensure_eq!(sender.has_unacked_data(), false);
        crate::ensure_eq!(rto.rto(), Duration::from_millis(600));

        Ok(())
    }

    // Retransmission clears the initial transmit time (Karn's algorithm).
    #[test]
    fn retransmission_taints_rtt_sample() -> Result<()> {
        let now: Instant = Instant::now();
        let mut sender: Sender = Sender::new(SeqNumber::from(0), 1450, 4096);
        let mut rto: RtoCalculator = RtoCalculator::new();

        sender.modify_send_next(|s| s + SeqNumber::from(5));
        sender.push_unacked_segment(UnackedSegment {
            bytes: vec![1, 2, 3, 4, 5],
            initial_tx: Some(now),
        });

        let (seq, bytes) = sender.retransmission_data().unwrap();
        crate::ensure_eq!(seq, SeqNumber::from(0));
        crate::ensure_eq!(bytes, vec![1, 2, 3, 4, 5]);

        sender.remove_acknowledged_data(5, now + Duration::from_secs(5), &mut rto);
        crate::ensure_eq!(rto.rto(), Duration::from_secs(1));

        Ok(())
    }

    // The persist probe takes exactly one byte and leaves the rest queued.
    #[test]
    fn one_byte_probe() -> Result<()> {
        let mut sender: Sender = Sender::new(SeqNumber::from(0), 1450, 4096);

        sender.push_unsent(&[7, 8, 9])?;
        crate::ensure_eq!(sender.pop_one_unsent_byte(), Some(vec![7]));
        crate::ensure_eq!(sender.top_size_unsent(), Some(2));

        Ok(())
    }
}
