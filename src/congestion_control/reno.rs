// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use super::{
    CongestionControl,
    FastRetransmitRecovery,
    Options,
    Phase,
    SlowStartCongestionAvoidance,
};
use crate::{
    constants::INITIAL_CWND_MSS,
    seq_number::SeqNumber,
};
use ::std::{
    cmp,
    fmt::Debug,
    time::Duration,
};

//==============================================================================
// Structures
//==============================================================================

/// Reno congestion control (RFC 5681).
///
/// Slow start grows the window by one MSS per acknowledged segment,
/// congestion avoidance by roughly one MSS per round trip, and loss is
/// handled two ways: three duplicate ACKs trigger fast retransmit and halve
/// the window, while a retransmission timeout collapses it to a single MSS
/// and restarts slow start.
#[derive(Debug)]
pub struct Reno {
    mss: u32,

    // Congestion window, in bytes.
    cwnd: u32,

    // Slow-start threshold, in bytes. Starts at an effectively unbounded
    // sentinel so the first slow start runs until loss.
    ssthresh: u32,

    duplicate_ack_count: u32,

    phase: Phase,

    // Asks the sender to resend the oldest unacknowledged segment without
    // waiting for the retransmission timer.
    retransmit_now: bool,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Reno {
    // A new ACK acknowledges data; reset loss tracking and grow the window.
    fn on_new_ack(&mut self, bytes_acked: u32) {
        self.duplicate_ack_count = 0;

        match self.phase {
            Phase::FastRecovery => {
                // Deflate the window back to the post-loss threshold (RFC 5681 Section 3.2 step 6).
                self.cwnd = self.ssthresh;
                self.phase = Phase::CongestionAvoidance;
            },
            Phase::SlowStart => {
                self.cwnd += cmp::min(bytes_acked, self.mss);
                if self.cwnd >= self.ssthresh {
                    self.phase = Phase::CongestionAvoidance;
                }
            },
            Phase::CongestionAvoidance => {
                // Approximates one MSS of growth per round trip.
                self.cwnd += ((self.mss as u64 * self.mss as u64) / self.cwnd as u64) as u32;
            },
        }
    }

    fn on_duplicate_ack(&mut self, flight_size: u32) {
        // Duplicate-ACK count for loss detection (RFC 5681 Section 3.2).
        const FAST_RETRANSMIT_THRESHOLD: u32 = 3;

        self.duplicate_ack_count += 1;

        match self.phase {
            Phase::FastRecovery => {
                // Inflate: the duplicate ACK signals a segment has left the network.
                self.cwnd += self.mss;
            },
            _ if self.duplicate_ack_count == FAST_RETRANSMIT_THRESHOLD => {
                self.ssthresh = cmp::max(flight_size / 2, 2 * self.mss);
                self.cwnd = self.ssthresh + FAST_RETRANSMIT_THRESHOLD * self.mss;
                self.phase = Phase::FastRecovery;
                self.retransmit_now = true;
            },
            _ => (),
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl CongestionControl for Reno {
    fn new(mss: usize, _seq_no: SeqNumber, options: Option<Options>) -> Box<dyn CongestionControl> {
        let mss: u32 = mss as u32;
        let initial_cwnd_mss: u32 = options
            .as_ref()
            .and_then(|opts| opts.get_int("initial_cwnd_mss"))
            .map(|mult| mult as u32)
            .unwrap_or(INITIAL_CWND_MSS);

        Box::new(Self {
            mss,
            cwnd: initial_cwnd_mss * mss,
            ssthresh: u32::MAX,
            duplicate_ack_count: 0,
            phase: Phase::SlowStart,
            retransmit_now: false,
        })
    }
}

impl SlowStartCongestionAvoidance for Reno {
    fn get_cwnd(&self) -> u32 {
        self.cwnd
    }

    fn get_ssthresh(&self) -> u32 {
        self.ssthresh
    }

    fn get_phase(&self) -> Phase {
        self.phase
    }

    fn on_ack_received(&mut self, _rto: Duration, send_unacked: SeqNumber, send_next: SeqNumber, ack_seq_no: SeqNumber) {
        if ack_seq_no == send_unacked && send_next != send_unacked {
            // Nothing new acknowledged while data is in flight.
            let flight_size: u32 = (send_next - send_unacked).into();
            self.on_duplicate_ack(flight_size);
        } else if ack_seq_no > send_unacked {
            let bytes_acked: u32 = (ack_seq_no - send_unacked).into();
            self.on_new_ack(bytes_acked);
        }
    }

    fn on_rto(&mut self, flight_size: u32) {
        // The most punitive reaction: collapse to one segment and restart
        // slow start (RFC 5681 Section 3.1, equation 4).
        self.ssthresh = cmp::max(flight_size / 2, 2 * self.mss);
        self.cwnd = self.mss;
        self.duplicate_ack_count = 0;
        self.phase = Phase::SlowStart;
        self.retransmit_now = false;
    }
}

impl FastRetransmitRecovery for Reno {
    fn get_duplicate_ack_count(&self) -> u32 {
        self.duplicate_ack_count
    }

    fn get_retransmit_now_flag(&self) -> bool {
        self.retransmit_now
    }

    fn on_fast_retransmit(&mut self) {
        self.retransmit_now = false;
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ::anyhow::Result;

    const MSS: usize = 1000;

    fn new_reno() -> Box<dyn CongestionControl> {
        Reno::new(MSS, SeqNumber::from(100), None)
    }

    fn ack(cc: &mut Box<dyn CongestionControl>, una: u32, nxt: u32, ack_no: u32) {
        cc.on_ack_received(
            Duration::from_millis(100),
            SeqNumber::from(una),
            SeqNumber::from(nxt),
            SeqNumber::from(ack_no),
        );
    }

    // Slow start adds at most one MSS per ACK, regardless of how many bytes
    // the ACK covers.
    #[test]
    fn slow_start_growth() -> Result<()> {
        let mut cc = new_reno();
        let initial: u32 = cc.get_cwnd();
        crate::ensure_eq!(initial, 10 * MSS as u32);
        crate::ensure_eq!(cc.get_phase(), Phase::SlowStart);

        ack(&mut cc, 0, 4000, 4000);
        crate::ensure_eq!(cc.get_cwnd(), initial + MSS as u32);

        ack(&mut cc, 4000, 4500, 4500);
        crate::ensure_eq!(cc.get_cwnd(), initial + MSS as u32 + 500);

        Ok(())
    }

    // Exactly three duplicate ACKs halve the window and enter fast recovery;
    // further duplicates inflate it; a new ACK deflates it.
    #[test]
    fn fast_retransmit_and_recovery() -> Result<()> {
        let mut cc = new_reno();
        let flight: u32 = 8000;

        for _ in 0..2 {
            ack(&mut cc, 0, flight, 0);
        }
        crate::ensure_eq!(cc.get_phase(), Phase::SlowStart);
        crate::ensure_eq!(cc.get_retransmit_now_flag(), false);

        // Third duplicate trips the threshold.
        ack(&mut cc, 0, flight, 0);
        let expected_ssthresh: u32 = flight / 2;
        crate::ensure_eq!(cc.get_ssthresh(), expected_ssthresh);
        crate::ensure_eq!(cc.get_cwnd(), expected_ssthresh + 3 * MSS as u32);
        crate::ensure_eq!(cc.get_phase(), Phase::FastRecovery);
        crate::ensure_eq!(cc.get_retransmit_now_flag(), true);
        cc.on_fast_retransmit();
        crate::ensure_eq!(cc.get_retransmit_now_flag(), false);

        // A fourth duplicate inflates by one MSS.
        ack(&mut cc, 0, flight, 0);
        crate::ensure_eq!(cc.get_cwnd(), expected_ssthresh + 4 * MSS as u32);

        // New data acknowledged: deflate and resume congestion avoidance.
        ack(&mut cc, 0, flight, flight);
        crate::ensure_eq!(cc.get_cwnd(), expected_ssthresh);
        crate::ensure_eq!(cc.get_phase(), Phase::CongestionAvoidance);

        Ok(())
    }

    // The flight size floor keeps ssthresh from dropping below two segments.
    #[test]
    fn ssthresh_floor_is_two_mss() -> Result<()> {
        let mut cc = new_reno();
        for _ in 0..3 {
            ack(&mut cc, 0, 1000, 0);
        }
        crate::ensure_eq!(cc.get_ssthresh(), 2 * MSS as u32);
        Ok(())
    }

    // A retransmission timeout collapses the window to one MSS and restarts
    // slow start.
    #[test]
    fn rto_collapses_window() -> Result<()> {
        let mut cc = new_reno();
        ack(&mut cc, 0, 8000, 8000);
        crate::ensure_eq!(cc.get_phase(), Phase::SlowStart);

        cc.on_rto(8000);
        crate::ensure_eq!(cc.get_cwnd(), MSS as u32);
        crate::ensure_eq!(cc.get_ssthresh(), 4000);
        crate::ensure_eq!(cc.get_phase(), Phase::SlowStart);
        crate::ensure_eq!(cc.get_duplicate_ack_count(), 0);

        Ok(())
    }

    // Congestion avoidance growth is MSS*MSS/cwnd per ACK.
    #[test]
    fn congestion_avoidance_growth() -> Result<()> {
        let mut cc = new_reno();
        cc.on_rto(8000);
        crate::ensure_eq!(cc.get_cwnd(), MSS as u32);

        // Grow back to ssthresh (4000) through slow start.
        for i in 0..3 {
            ack(&mut cc, i * 1000, (i + 1) * 1000, (i + 1) * 1000);
        }
        crate::ensure_eq!(cc.get_cwnd(), 4000);
        crate::ensure_eq!(cc.get_phase(), Phase::CongestionAvoidance);

        ack(&mut cc, 4000, 5000, 5000);
        crate::ensure_eq!(cc.get_cwnd(), 4000 + (MSS * MSS / 4000) as u32);

        Ok(())
    }
}
