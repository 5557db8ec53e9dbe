// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::seq_number::SeqNumber;
use ::std::{
    cmp,
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Structures
//==============================================================================

/// Flow control state for one connection.
///
/// Tracks both directions of the window negotiation: the peer's advertised
/// receive window (SND.WND in RFC 793 terms), which caps how much we may have
/// in flight, and our own advertised window (RCV.WND), which we must never
/// retract once offered. When the peer's window closes completely, a persist
/// timer periodically probes with a single byte so a lost window update
/// cannot stall the connection forever.
#[derive(Debug)]
pub struct FlowControl {
    // Available window to send into, as advertised by our peer. SND.WND.
    send_window: u32,
    send_window_last_update_seq: SeqNumber, // SND.WL1
    send_window_last_update_ack: SeqNumber, // SND.WL2

    // RFC 1323: number of bits to shift the peer's advertised window.
    send_window_scale: u8,

    // Capacity of our receive buffer, in bytes.
    receive_window_size: u32,

    // Number of bits to shift our advertised window down by on the wire.
    receive_window_scale: u8,

    // Highest RCV.NXT + RCV.WND we have ever advertised. The window we offer
    // may never shrink below this edge: the peer is entitled to transmit into
    // any sequence space we have already offered.
    advertised_right_edge: SeqNumber,

    // Persist (zero-window probe) timer state.
    persist_deadline: Option<Instant>,
    persist_interval: Duration,
    persist_current_interval: Duration,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl FlowControl {
    pub fn new(
        send_window: u32,
        send_window_scale: u8,
        receive_window_size: u32,
        receive_window_scale: u8,
        receive_next: SeqNumber,
        send_unacked: SeqNumber,
        persist_interval: Duration,
    ) -> Self {
        Self {
            send_window,
            // Seeded from the handshake: WL1 lives in the peer's sequence
            // space, WL2 in ours.
            send_window_last_update_seq: receive_next,
            send_window_last_update_ack: send_unacked,
            send_window_scale,
            receive_window_size,
            receive_window_scale,
            advertised_right_edge: receive_next + SeqNumber::from(receive_window_size),
            persist_deadline: None,
            persist_interval,
            persist_current_interval: persist_interval,
        }
    }

    pub fn get_send_window(&self) -> u32 {
        self.send_window
    }

    /// Updates our send window to the value advertised by our peer.
    ///
    /// The update is applied only if this segment is not older than the last
    /// one used to update the window (the WL1/WL2 check of RFC 793 Section
    /// 3.9), so a reordered stale segment cannot shrink the window behind a
    /// newer advertisement.
    pub fn update_send_window(&mut self, seq_num: SeqNumber, ack_num: SeqNumber, window_size: u16, now: Instant) {
        if self.send_window_last_update_seq < seq_num
            || (self.send_window_last_update_seq == seq_num && self.send_window_last_update_ack <= ack_num)
        {
            self.send_window = (window_size as u32) << self.send_window_scale;
            self.send_window_last_update_seq = seq_num;
            self.send_window_last_update_ack = ack_num;

            debug!(
                "Updating window size -> {} (hdr {}, scale {})",
                self.send_window, window_size, self.send_window_scale
            );

            if self.send_window == 0 {
                if self.persist_deadline.is_none() {
                    self.persist_current_interval = self.persist_interval;
                    self.persist_deadline = Some(now + self.persist_current_interval);
                }
            } else {
                // Window reopened: the probe has served its purpose.
                self.persist_deadline = None;
            }
        }
    }

    /// Number of bytes the scheduler may put in flight right now, given the
    /// congestion window and the bytes already outstanding.
    pub fn effective_window(&self, cwnd: u32, flight_size: u32) -> u32 {
        cmp::min(cwnd, self.send_window).saturating_sub(flight_size)
    }

    /// Computes the window to advertise to the peer, given the current
    /// receive cursor and the number of bytes buffered but not yet read by
    /// the application. The returned value is in wire units (scaled down).
    pub fn advertised_window(&mut self, receive_next: SeqNumber, buffered_bytes: u32) -> u16 {
        let available: u32 = self.receive_window_size.saturating_sub(buffered_bytes);
        let candidate_edge: SeqNumber = receive_next + SeqNumber::from(available);

        // Hold the line at the furthest edge ever offered.
        let window: u32 = if candidate_edge < self.advertised_right_edge {
            (self.advertised_right_edge - receive_next).into()
        } else {
            self.advertised_right_edge = candidate_edge;
            available
        };

        let scaled: u32 = window >> self.receive_window_scale;
        cmp::min(scaled, u16::MAX as u32) as u16
    }

    /// The absolute window size we currently advertise, in bytes.
    pub fn receive_window(&self, receive_next: SeqNumber, buffered_bytes: u32) -> u32 {
        let available: u32 = self.receive_window_size.saturating_sub(buffered_bytes);
        let candidate_edge: SeqNumber = receive_next + SeqNumber::from(available);
        if candidate_edge < self.advertised_right_edge {
            (self.advertised_right_edge - receive_next).into()
        } else {
            available
        }
    }

    pub fn get_persist_deadline(&self) -> Option<Instant> {
        self.persist_deadline
    }

    /// Disarms the probe timer; used when the connection is torn down.
    pub fn cancel_persist(&mut self) {
        self.persist_deadline = None;
    }

    /// Called when the persist timer fires. Backs off the probe interval
    /// (doubling, capped at a minute) and re-arms. The caller is responsible
    /// for actually transmitting the 1-byte probe.
    pub fn on_persist_timeout(&mut self, now: Instant) {
        const MAX_PERSIST_INTERVAL: Duration = Duration::from_secs(60);

        self.persist_current_interval = cmp::min(self.persist_current_interval * 2, MAX_PERSIST_INTERVAL);
        self.persist_deadline = Some(now + self.persist_current_interval);
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
