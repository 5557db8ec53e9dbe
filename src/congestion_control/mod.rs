// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod none;
mod options;
mod reno;

use crate::seq_number::SeqNumber;
use ::std::{
    fmt::Debug,
    time::Duration,
};

pub use self::{
    none::None,
    options::{
        OptionValue,
        Options,
    },
    reno::Reno,
};

/// Congestion-control phase. Every algorithm reports one of these, even the
/// no-op one, so callers and tests can observe where the sender sits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

pub trait SlowStartCongestionAvoidance {
    fn get_cwnd(&self) -> u32;

    fn get_ssthresh(&self) -> u32 {
        u32::MAX
    }

    fn get_phase(&self) -> Phase {
        Phase::SlowStart
    }

    fn on_ack_received(
        &mut self,
        _rto: Duration,
        _send_unacked: SeqNumber,
        _send_next: SeqNumber,
        _ack_seq_no: SeqNumber,
    ) {
    }

    // Called immediately before retransmit after RTO.
    fn on_rto(&mut self, _flight_size: u32) {}

    // Called immediately before a segment is sent for the 1st time.
    fn on_send(&mut self, _rto: Duration, _num_sent_bytes: u32) {}
}

pub trait FastRetransmitRecovery
where
    Self: SlowStartCongestionAvoidance,
{
    fn get_duplicate_ack_count(&self) -> u32 {
        0
    }

    /// Set when the algorithm wants the oldest unacknowledged segment resent
    /// ahead of the retransmission timer. The sender clears it by calling
    /// `on_fast_retransmit`.
    fn get_retransmit_now_flag(&self) -> bool {
        false
    }

    fn on_fast_retransmit(&mut self) {}
}

pub trait CongestionControl: SlowStartCongestionAvoidance + FastRetransmitRecovery + Debug {
    fn new(mss: usize, seq_no: SeqNumber, options: Option<options::Options>) -> Box<dyn CongestionControl>
    where
        Self: Sized;
}
