// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    config::TransportConfig,
    congestion_control::{
        self,
        CongestionControl,
        Phase,
    },
    constants::FALLBACK_MSS,
    fail::Fail,
    flow_control::FlowControl,
    reassembly::ReassemblyBuffer,
    rto::RtoCalculator,
    runtime::NetworkRuntime,
    segment::{
        SegmentHeader,
        SegmentOption,
    },
    sender::{
        Sender,
        UnackedSegment,
    },
    seq_number::SeqNumber,
};
use ::libc::EINVAL;
use ::std::{
    cell::RefCell,
    cmp,
    net::SocketAddrV4,
    rc::Rc,
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Structures
//==============================================================================

/// Connection states (RFC 793, Section 3.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// Transmission control block: all state for a single connection.
///
/// This is a sans-I/O state machine. Nothing here blocks or spawns: incoming
/// segments, timer expirations, and application calls are all fed in
/// explicitly with the current time, and the only output path is
/// `NetworkRuntime::transmit`. Serialization of mutation is enforced by
/// `&mut self`; the owner decides whether that means a mutex, an actor, or a
/// single thread.
pub struct ControlBlock<RT: NetworkRuntime> {
    local: SocketAddrV4,
    remote: SocketAddrV4,

    rt: Rc<RefCell<RT>>,
    config: TransportConfig,

    state: State,

    sender: Sender,
    reassembly: ReassemblyBuffer,
    flow_control: FlowControl,
    cc: Box<dyn CongestionControl>,
    rto_calculator: RtoCalculator,

    // Our initial sequence number. The SYN consumes sequence number iss;
    // data starts at iss + 1.
    iss: SeqNumber,

    // Negotiated during the handshake.
    negotiated_remote_mss: Option<usize>,
    remote_window_scale: u8,
    local_window_scale: u8,
    sack_permitted: bool,
    timestamps_enabled: bool,

    // Most recent timestamp value received from the peer, echoed back.
    ts_recent: u32,
    // Epoch for our own timestamp clock.
    ts_epoch: Instant,

    // Deadline for retransmitting the oldest unacknowledged segment (or the
    // SYN / SYN+ACK while the handshake is in progress).
    retransmit_deadline: Option<Instant>,
    retransmits_remaining: usize,

    // Delayed-ACK state: deadline plus a count of full segments received
    // since we last acknowledged anything.
    ack_deadline: Option<Instant>,
    segments_since_ack: u32,

    time_wait_deadline: Option<Instant>,

    // Set once the peer's FIN has been reached in sequence; the ACK we send
    // from then on covers it.
    receive_fin_consumed: bool,

    // Set once the user has closed (or shut down) the send side; the FIN
    // marker is on the unsent queue behind any accepted data.
    user_is_done_sending: bool,

    // Sequence number our FIN occupies, once it has actually been emitted.
    fin_seq: Option<SeqNumber>,

    // Terminal failure, latched: every subsequent send/receive returns this.
    terminal_failure: Option<Fail>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl<RT: NetworkRuntime> ControlBlock<RT> {
    /// Active open: emits a SYN and leaves the connection in SYN_SENT.
    pub fn open_active(
        local: SocketAddrV4,
        remote: SocketAddrV4,
        rt: Rc<RefCell<RT>>,
        config: TransportConfig,
        iss: SeqNumber,
        now: Instant,
    ) -> Result<Self, Fail> {
        let mut cb: Self = Self::new(local, remote, rt, config, iss, now);
        cb.state = State::SynSent;
        cb.emit_syn(now).map_err(|e| {
            let cause: String = format!("failed to transmit SYN: {:?}", e);
            error!("open_active(): {}", cause);
            Fail::connect_failed(&cause)
        })?;
        cb.retransmit_deadline = Some(now + cb.config.get_handshake_timeout());
        cb.retransmits_remaining = cb.config.get_handshake_retries();
        Ok(cb)
    }

    /// Passive open: consumes a peer's SYN, emits a SYN+ACK, and leaves the
    /// connection in SYN_RECEIVED.
    pub fn open_passive(
        local: SocketAddrV4,
        remote: SocketAddrV4,
        rt: Rc<RefCell<RT>>,
        config: TransportConfig,
        iss: SeqNumber,
        syn: &SegmentHeader,
        now: Instant,
    ) -> Result<Self, Fail> {
        let mut cb: Self = Self::new(local, remote, rt, config, iss, now);
        cb.state = State::SynReceived;
        cb.negotiate(syn);
        cb.install_connection_state(syn.seq_num + SeqNumber::from(1), syn.window_size, iss + SeqNumber::from(1));
        cb.emit_syn(now)?;
        cb.retransmit_deadline = Some(now + cb.config.get_handshake_timeout());
        cb.retransmits_remaining = cb.config.get_handshake_retries();
        Ok(cb)
    }

    fn new(
        local: SocketAddrV4,
        remote: SocketAddrV4,
        rt: Rc<RefCell<RT>>,
        config: TransportConfig,
        iss: SeqNumber,
        now: Instant,
    ) -> Self {
        // Placeholder component state; replaced when the handshake completes
        // and the peer's parameters are known.
        let mss: usize = config.get_advertised_mss();
        let sender: Sender = Sender::new(iss + SeqNumber::from(1), mss, config.get_send_buffer_size());
        let reassembly: ReassemblyBuffer = ReassemblyBuffer::new(SeqNumber::from(0));
        let flow_control: FlowControl = FlowControl::new(
            0,
            0,
            config.get_receive_window_size() as u32,
            0,
            SeqNumber::from(0),
            iss + SeqNumber::from(1),
            config.get_persist_interval(),
        );
        let cc: Box<dyn CongestionControl> = congestion_control::None::new(mss, iss, Option::None);

        Self {
            local,
            remote,
            rt,
            state: State::Closed,
            sender,
            reassembly,
            flow_control,
            cc,
            rto_calculator: RtoCalculator::new(),
            iss,
            negotiated_remote_mss: Option::None,
            remote_window_scale: 0,
            local_window_scale: 0,
            sack_permitted: false,
            timestamps_enabled: false,
            ts_recent: 0,
            ts_epoch: now,
            retransmit_deadline: Option::None,
            retransmits_remaining: config.get_retransmit_retries(),
            ack_deadline: Option::None,
            segments_since_ack: 0,
            time_wait_deadline: Option::None,
            receive_fin_consumed: false,
            user_is_done_sending: false,
            fin_seq: Option::None,
            terminal_failure: Option::None,
            config,
        }
    }

    //==========================================================================
    // Introspection
    //==========================================================================

    pub fn state(&self) -> State {
        self.state
    }

    pub fn endpoints(&self) -> (SocketAddrV4, SocketAddrV4) {
        (self.local, self.remote)
    }

    pub fn get_send_unacked(&self) -> SeqNumber {
        self.sender.get_send_unacked()
    }

    pub fn get_send_next(&self) -> SeqNumber {
        self.sender.get_send_next()
    }

    pub fn get_receive_next(&self) -> SeqNumber {
        self.reassembly.receive_next()
    }

    pub fn get_cwnd(&self) -> u32 {
        self.cc.get_cwnd()
    }

    pub fn get_ssthresh(&self) -> u32 {
        self.cc.get_ssthresh()
    }

    pub fn get_congestion_phase(&self) -> Phase {
        self.cc.get_phase()
    }

    pub fn get_send_window(&self) -> u32 {
        self.flow_control.get_send_window()
    }

    pub fn get_mss(&self) -> usize {
        self.sender.get_mss()
    }

    /// Earliest pending deadline, for drivers that sleep between events.
    pub fn next_deadline(&self) -> Option<Instant> {
        let deadlines: [Option<Instant>; 4] = [
            self.retransmit_deadline,
            self.flow_control.get_persist_deadline(),
            self.ack_deadline,
            self.time_wait_deadline,
        ];
        deadlines.iter().flatten().min().copied()
    }

    //==========================================================================
    // Application interface
    //==========================================================================

    /// Accepts data into the bounded send buffer and transmits whatever the
    /// effective window allows. Returns the number of bytes accepted.
    pub fn send(&mut self, buf: &[u8], now: Instant) -> Result<usize, Fail> {
        if let Some(failure) = &self.terminal_failure {
            return Err(failure.clone());
        }
        if self.user_is_done_sending {
            return Err(Fail::new(EINVAL, "connection is closing"));
        }
        match self.state {
            State::Established | State::CloseWait => (),
            _ => return Err(Fail::new(EINVAL, "connection is not established")),
        }

        let accepted: usize = self.sender.push_unsent(buf)?;
        self.do_send(now);
        Ok(accepted)
    }

    /// Drains up to `max_bytes` of contiguous received data. An empty buffer
    /// means the peer closed its side (EOF); EWOULDBLOCK means nothing is
    /// available yet.
    pub fn receive(&mut self, max_bytes: usize, _now: Instant) -> Result<Vec<u8>, Fail> {
        if let Some(buf) = self.reassembly.pop(max_bytes) {
            return Ok(buf);
        }
        if let Some(failure) = &self.terminal_failure {
            return Err(failure.clone());
        }
        if self.receive_fin_consumed {
            // Graceful end of stream.
            return Ok(Vec::new());
        }
        Err(Fail::would_block("no data available"))
    }

    /// Full close: no more sends, and the FIN goes out behind any data
    /// already accepted into the send buffer.
    pub fn close(&mut self, now: Instant) -> Result<(), Fail> {
        if self.state == State::SynSent {
            // Nothing established to tear down.
            self.state = State::Closed;
            self.cancel_timers();
            return Ok(());
        }
        self.shutdown_write(now)
    }

    /// Half close: stop sending after a FIN, keep receiving.
    pub fn shutdown_write(&mut self, now: Instant) -> Result<(), Fail> {
        if let Some(failure) = &self.terminal_failure {
            return Err(failure.clone());
        }
        if self.user_is_done_sending {
            return Ok(());
        }
        match self.state {
            State::Established | State::CloseWait => (),
            _ => return Err(Fail::new(EINVAL, "connection is not established")),
        }

        self.user_is_done_sending = true;
        self.sender.push_fin_marker();
        self.do_send(now);
        Ok(())
    }

    //==========================================================================
    // Segment arrival
    //==========================================================================

    /// Feeds one parsed segment through the state machine. This is the
    /// single transition function for network input: every state handles (or
    /// explicitly ignores) every segment shape here.
    pub fn on_segment_received(&mut self, header: &SegmentHeader, data: Vec<u8>, now: Instant) {
        match self.state {
            State::Closed | State::Listen => {
                // No connection state; the demultiplexer shouldn't have
                // routed this segment here. Drop it.
                trace!("dropping segment in state {:?}", self.state);
            },
            State::SynSent => self.on_segment_syn_sent(header, now),
            State::SynReceived => self.on_segment_syn_received(header, data, now),
            State::Established
            | State::FinWait1
            | State::FinWait2
            | State::CloseWait
            | State::Closing
            | State::LastAck
            | State::TimeWait => self.process_segment(header, data, now),
        }
    }

    fn on_segment_syn_sent(&mut self, header: &SegmentHeader, now: Instant) {
        // RFC 793, Section 3.9, SYN-SENT arrival processing.
        let ack_acceptable: bool = header.ack && header.ack_num == self.iss + SeqNumber::from(1);
        if header.ack && !ack_acceptable {
            trace!("unacceptable ACK in SYN_SENT: {}", header.ack_num);
            return;
        }

        if header.rst {
            if ack_acceptable {
                let cause: String = format!("connection refused by {}", self.remote);
                info!("on_segment_syn_sent(): {}", cause);
                self.terminate(Fail::connect_failed(&cause));
            }
            return;
        }

        if !header.syn {
            return;
        }
        if !header.ack {
            // Simultaneous open is out of scope; drop the bare SYN.
            trace!("simultaneous open not supported; dropping SYN");
            return;
        }

        // SYN+ACK: the handshake completes on our side.
        self.negotiate(header);
        self.install_connection_state(
            header.seq_num + SeqNumber::from(1),
            header.window_size,
            self.iss + SeqNumber::from(1),
        );
        self.state = State::Established;
        self.retransmit_deadline = Option::None;
        self.retransmits_remaining = self.config.get_retransmit_retries();
        debug!("connection to {} established", self.remote);
        self.send_ack(now);
    }

    fn on_segment_syn_received(&mut self, header: &SegmentHeader, data: Vec<u8>, now: Instant) {
        if header.rst {
            // The peer walked away before the handshake completed. This
            // connection was never surfaced to the application.
            debug!("RST in SYN_RECEIVED from {}", self.remote);
            self.terminate(Fail::connection_reset("connection reset during handshake"));
            return;
        }

        if header.syn && !header.ack {
            // Duplicate SYN: our SYN+ACK was likely lost. Resend it.
            if let Err(e) = self.emit_syn(now) {
                warn!("failed to re-emit SYN+ACK: {:?}", e);
            }
            return;
        }

        if header.ack && header.ack_num == self.iss + SeqNumber::from(1) {
            self.state = State::Established;
            self.retransmit_deadline = Option::None;
            self.retransmits_remaining = self.config.get_retransmit_retries();
            debug!("connection from {} established", self.remote);
            // The completing ACK may itself carry data or a FIN.
            self.process_segment(header, data, now);
        }
    }

    /// Main receive path for synchronized states, following the RFC 793
    /// Section 3.9 order: acceptability, RST, ACK, payload, FIN.
    fn process_segment(&mut self, header: &SegmentHeader, mut data: Vec<u8>, now: Instant) {
        let mut seg_start: SeqNumber = header.seq_num;
        let mut seg_len: u32 = data.len() as u32;
        if header.syn {
            // A SYN in a synchronized state is never valid.
            trace!("dropping SYN in state {:?}", self.state);
            self.send_ack(now);
            return;
        }
        let mut seg_fin: bool = header.fin;
        if seg_fin {
            seg_len += 1;
        }
        let mut seg_end: SeqNumber = seg_start + SeqNumber::from(seg_len);

        // Acceptability test (RFC 793, Section 3.3, page 26).
        let receive_next: SeqNumber = self.reassembly.receive_next();
        let receive_window: u32 = self
            .flow_control
            .receive_window(receive_next, self.reassembly.buffered_bytes());
        let window_end: SeqNumber = receive_next + SeqNumber::from(receive_window);
        let acceptable: bool = if seg_len == 0 {
            if receive_window == 0 {
                seg_start == receive_next
            } else {
                receive_next <= seg_start && seg_start < window_end
            }
        } else if receive_window == 0 {
            false
        } else {
            (receive_next <= seg_start && seg_start < window_end)
                || (receive_next <= seg_end - SeqNumber::from(1) && seg_end - SeqNumber::from(1) < window_end)
        };
        if !acceptable {
            if !header.rst {
                trace!("unacceptable segment (seq {}, len {}); re-ACKing", seg_start, seg_len);
                self.send_ack(now);
            }
            return;
        }

        if header.rst {
            let cause: String = format!("connection reset by {}", self.remote);
            info!("process_segment(): {}", cause);
            self.terminate(Fail::connection_reset(&cause));
            return;
        }

        if self.state == State::TimeWait {
            // A retransmitted FIN restarts the 2*MSL wait.
            self.time_wait_deadline = Some(now + self.config.get_time_wait_duration());
            self.send_ack(now);
            return;
        }

        // Every segment past the handshake must carry an ACK.
        if !header.ack {
            trace!("dropping segment without ACK");
            return;
        }

        // Trim any duplicate prefix (bytes before RCV.NXT).
        if seg_start < receive_next {
            let duplicate: u32 = cmp::min(u32::from(receive_next - seg_start), data.len() as u32);
            data.drain(..duplicate as usize);
            seg_start = seg_start + SeqNumber::from(duplicate);
            seg_len -= duplicate;
        }

        // Trim any overflow past our receive window, including a FIN that
        // now falls outside it.
        if seg_end > window_end {
            let mut excess: u32 = u32::from(seg_end - window_end);
            if seg_fin {
                // The FIN occupies the last sequence unit of the segment, so
                // it is always part of the overflow here. Dropping it covers
                // one unit of the excess; only the remainder is payload.
                seg_fin = false;
                seg_len -= 1;
                seg_end = seg_end - SeqNumber::from(1);
                excess -= 1;
            }
            let data_excess: u32 = cmp::min(excess, data.len() as u32);
            data.truncate(data.len() - data_excess as usize);
            seg_len -= excess;
            seg_end = seg_end - SeqNumber::from(excess);
        }

        if self.timestamps_enabled {
            for option in header.iter_options() {
                if let SegmentOption::Timestamp { value, .. } = option {
                    self.ts_recent = *value;
                }
            }
        }

        if !self.process_ack(header, now) {
            return;
        }
        if self.state == State::Closed {
            // LAST_ACK completed inside process_ack.
            return;
        }

        // Data (and an in-order FIN) can only legitimately arrive in these
        // three states; elsewhere the peer already ended its stream.
        match self.state {
            State::Established | State::FinWait1 | State::FinWait2 => (),
            _ => return,
        }

        if seg_len == 0 {
            return;
        }

        if seg_start == self.reassembly.receive_next() {
            let receive_next_before: SeqNumber = self.reassembly.receive_next();
            if !data.is_empty() {
                self.reassembly.push(data);
            }
            let merged_out_of_order: bool =
                self.reassembly.receive_next() - receive_next_before > SeqNumber::from(seg_len - (seg_fin as u32));

            let fin_reached: bool = seg_fin || self.reassembly.fin_is_next();
            if fin_reached {
                self.on_fin_received(now);
            } else if merged_out_of_order {
                // Filled a gap: acknowledge immediately so the peer's
                // retransmission machinery stands down.
                self.send_ack(now);
            } else {
                self.delayed_ack(now);
            }
        } else {
            // Out of order: park it and ACK immediately (the duplicate ACK
            // is the peer's fast-retransmit signal).
            if seg_fin {
                self.reassembly.store_out_of_order_fin(seg_end - SeqNumber::from(1));
            }
            if !data.is_empty() {
                self.reassembly.store_out_of_order_segment(seg_start, data);
            }
            trace!("out-of-order segment at {} (expected {})", seg_start, self.reassembly.receive_next());
            self.send_ack(now);
        }
    }

    /// Returns false when the segment must be dropped without further
    /// processing.
    fn process_ack(&mut self, header: &SegmentHeader, now: Instant) -> bool {
        let send_unacked: SeqNumber = self.sender.get_send_unacked();
        let send_next: SeqNumber = self.sender.get_send_next();
        let ack_num: SeqNumber = header.ack_num;

        if ack_num > send_next {
            // An ACK for data we haven't sent yet.
            trace!("ACK {} beyond SND.NXT {}; re-ACKing", ack_num, send_next);
            self.send_ack(now);
            return false;
        }

        // Congestion control sees every ACK, in arrival order, before SND.UNA
        // moves (it needs the old value to recognize duplicates).
        if ack_num >= send_unacked {
            self.cc
                .on_ack_received(self.rto_calculator.rto(), send_unacked, send_next, ack_num);

            let bytes_acknowledged: u32 = (ack_num - send_unacked).into();
            if bytes_acknowledged > 0 {
                self.sender
                    .remove_acknowledged_data(bytes_acknowledged, now, &mut self.rto_calculator);
                self.retransmits_remaining = self.config.get_retransmit_retries();

                // Restart (or stop) the retransmission timer.
                if self.sender.has_unacked_data() {
                    self.retransmit_deadline = Some(now + self.rto_calculator.rto());
                } else {
                    self.retransmit_deadline = Option::None;
                }

                self.on_our_fin_acknowledged(now);
                if self.state == State::Closed {
                    return true;
                }
            }

            self.flow_control
                .update_send_window(header.seq_num, ack_num, header.window_size, now);

            if self.cc.get_retransmit_now_flag() {
                debug!("fast retransmit at {}", self.sender.get_send_unacked());
                self.retransmit(now);
                self.cc.on_fast_retransmit();
            }

            // Newly opened window may unblock queued data (or our FIN).
            self.do_send(now);
        } else {
            // Old duplicate ACK; nothing to update.
            trace!("stale ACK {} below SND.UNA {}", ack_num, send_unacked);
        }
        true
    }

    /// Checks whether an ACK covered our FIN and advances the close protocol.
    fn on_our_fin_acknowledged(&mut self, now: Instant) {
        let fin_acked: bool = match self.fin_seq {
            Some(fin_seq) => self.sender.get_send_unacked() > fin_seq,
            Option::None => false,
        };
        if !fin_acked {
            return;
        }

        match self.state {
            State::FinWait1 => self.state = State::FinWait2,
            State::Closing => {
                self.state = State::TimeWait;
                self.time_wait_deadline = Some(now + self.config.get_time_wait_duration());
            },
            State::LastAck => {
                debug!("connection to {} closed", self.remote);
                self.state = State::Closed;
                self.cancel_timers();
            },
            _ => (),
        }
    }

    /// The peer's FIN is now at the receive cursor: acknowledge it and move
    /// through the passive (or simultaneous) close states.
    fn on_fin_received(&mut self, now: Instant) {
        if !self.receive_fin_consumed {
            self.receive_fin_consumed = true;
            debug!("FIN received from {}", self.remote);

            match self.state {
                State::Established => self.state = State::CloseWait,
                State::FinWait1 => {
                    // Our FIN is unacknowledged (an ACK covering it would
                    // have moved us to FIN_WAIT_2 already): both sides are
                    // closing simultaneously.
                    self.state = State::Closing;
                },
                State::FinWait2 => {
                    self.state = State::TimeWait;
                    self.time_wait_deadline = Some(now + self.config.get_time_wait_duration());
                },
                _ => (),
            }
        }
        self.send_ack(now);
    }

    //==========================================================================
    // Transmission
    //==========================================================================

    /// The send scheduler: moves data (and the FIN marker) from the unsent
    /// queue onto the wire, up to `min(cwnd, SND.WND)` minus what is already
    /// in flight, one MSS at a time.
    fn do_send(&mut self, now: Instant) {
        loop {
            match self.state {
                State::Established | State::CloseWait | State::FinWait1 | State::Closing | State::LastAck => (),
                _ => return,
            }

            let top_size: usize = match self.sender.top_size_unsent() {
                Some(size) => size,
                Option::None => return,
            };

            let effective_window: u32 = self
                .flow_control
                .effective_window(self.cc.get_cwnd(), self.sender.flight_size());
            if effective_window == 0 {
                // Flow- or congestion-blocked. If the peer's window is closed
                // the persist timer is already armed; either way, nothing to
                // do until an ACK arrives.
                return;
            }

            if top_size == 0 {
                // End-of-send marker: emit our FIN.
                let _ = self.sender.pop_unsent(0);
                self.emit_fin(now);
                continue;
            }

            let max_bytes: usize = cmp::min(self.sender.get_mss(), effective_window as usize);
            let buf: Vec<u8> = match self.sender.pop_unsent(max_bytes) {
                Some(buf) if !buf.is_empty() => buf,
                _ => return,
            };

            let rto: Duration = self.rto_calculator.rto();
            self.cc.on_send(rto, self.sender.flight_size());

            let seq_num: SeqNumber = self.sender.get_send_next();
            let mut header: SegmentHeader = self.build_header(now);
            header.seq_num = seq_num;
            header.psh = true;
            self.emit(header, &buf, now);

            self.sender.modify_send_next(|s| s + SeqNumber::from(buf.len() as u32));
            self.sender.push_unacked_segment(UnackedSegment {
                bytes: buf,
                initial_tx: Some(now),
            });

            if self.retransmit_deadline.is_none() {
                self.retransmit_deadline = Some(now + self.rto_calculator.rto());
            }
        }
    }

    fn emit_fin(&mut self, now: Instant) {
        let seq_num: SeqNumber = self.sender.get_send_next();
        let mut header: SegmentHeader = self.build_header(now);
        header.seq_num = seq_num;
        header.fin = true;
        self.emit(header, &[], now);

        self.fin_seq = Some(seq_num);
        self.sender.modify_send_next(|s| s + SeqNumber::from(1));
        self.sender.push_unacked_segment(UnackedSegment {
            bytes: Vec::new(),
            initial_tx: Some(now),
        });
        if self.retransmit_deadline.is_none() {
            self.retransmit_deadline = Some(now + self.rto_calculator.rto());
        }

        match self.state {
            State::Established => self.state = State::FinWait1,
            State::CloseWait => self.state = State::LastAck,
            _ => (),
        }
        debug!("FIN emitted at {} in state {:?}", seq_num, self.state);
    }

    /// Resends the oldest unacknowledged segment.
    fn retransmit(&mut self, now: Instant) {
        if let Some((seq_num, bytes)) = self.sender.retransmission_data() {
            let mut header: SegmentHeader = self.build_header(now);
            header.seq_num = seq_num;
            if bytes.is_empty() {
                // The marker stands for our FIN.
                header.fin = true;
            } else {
                header.psh = true;
            }
            self.emit(header, &bytes, now);
        }
    }

    fn send_ack(&mut self, now: Instant) {
        let header: SegmentHeader = self.build_header(now);
        self.emit(header, &[], now);
    }

    /// Fires the delayed-ACK policy: acknowledge immediately once two full
    /// segments have accumulated, otherwise within the configured delay.
    fn delayed_ack(&mut self, now: Instant) {
        self.segments_since_ack += 1;
        if self.segments_since_ack >= self.config.get_ack_delay_segments() {
            self.send_ack(now);
        } else if self.ack_deadline.is_none() {
            self.ack_deadline = Some(now + self.config.get_ack_delay_timeout());
        }
    }

    /// Emits the handshake segment for the current state: a SYN in SYN_SENT,
    /// a SYN+ACK in SYN_RECEIVED.
    fn emit_syn(&mut self, now: Instant) -> Result<(), Fail> {
        let mut header: SegmentHeader = SegmentHeader::new(self.local.port(), self.remote.port());
        header.seq_num = self.iss;
        header.syn = true;
        // The window field of a SYN is never scaled.
        header.window_size = self.config.get_receive_window_size();
        if self.state == State::SynReceived {
            header.ack = true;
            header.ack_num = self.reassembly.receive_next();
        }

        header.push_option(SegmentOption::MaximumSegmentSize(
            self.config.get_advertised_mss() as u16
        ));
        header.push_option(SegmentOption::WindowScale(self.config.get_window_scale()));
        if self.config.get_sack_enabled() {
            header.push_option(SegmentOption::SackPermitted);
        }
        if self.config.get_timestamps_enabled() {
            header.push_option(SegmentOption::Timestamp {
                value: self.timestamp(now),
                echo_reply: self.ts_recent,
            });
        }

        let datagram: Vec<u8> = header.serialize(self.local.ip(), self.remote.ip(), &[]);
        self.rt.borrow_mut().transmit(self.remote, datagram)
    }

    /// Builds a header for a non-SYN segment: ACK always set, current
    /// acknowledgment number and advertised window, SACK blocks and
    /// timestamps when negotiated. Sending any ACK satisfies the delayed-ACK
    /// machinery, so its state resets here.
    fn build_header(&mut self, now: Instant) -> SegmentHeader {
        let mut header: SegmentHeader = SegmentHeader::new(self.local.port(), self.remote.port());
        header.seq_num = self.sender.get_send_next();
        header.ack = true;
        header.ack_num = self.ack_for_peer();
        header.window_size = self
            .flow_control
            .advertised_window(self.reassembly.receive_next(), self.reassembly.buffered_bytes());

        if self.sack_permitted {
            let ranges = self.reassembly.selective_ack_ranges();
            if !ranges.is_empty() {
                header.push_option(SegmentOption::Sack(ranges));
            }
        }
        if self.timestamps_enabled {
            header.push_option(SegmentOption::Timestamp {
                value: self.timestamp(now),
                echo_reply: self.ts_recent,
            });
        }

        self.ack_deadline = Option::None;
        self.segments_since_ack = 0;

        header
    }

    fn emit(&mut self, header: SegmentHeader, payload: &[u8], _now: Instant) {
        let datagram: Vec<u8> = header.serialize(self.local.ip(), self.remote.ip(), payload);
        if let Err(e) = self.rt.borrow_mut().transmit(self.remote, datagram) {
            // The substrate is best-effort; a dropped transmit is
            // indistinguishable from wire loss and the timers recover it.
            warn!("transmit to {} failed: {:?}", self.remote, e);
        }
    }

    /// The acknowledgment number we owe the peer: RCV.NXT, plus one for
    /// their FIN once we've reached it.
    fn ack_for_peer(&self) -> SeqNumber {
        let receive_next: SeqNumber = self.reassembly.receive_next();
        if self.receive_fin_consumed {
            receive_next + SeqNumber::from(1)
        } else {
            receive_next
        }
    }

    fn timestamp(&self, now: Instant) -> u32 {
        now.duration_since(self.ts_epoch).as_millis() as u32
    }

    //==========================================================================
    // Timers
    //==========================================================================

    /// Fires any expired timers. Drivers call this whenever `next_deadline`
    /// passes (calling it early is harmless).
    pub fn on_timer(&mut self, now: Instant) {
        if self.state == State::Closed {
            return;
        }
        if let Some(deadline) = self.retransmit_deadline {
            if deadline <= now {
                self.on_retransmit_timeout(now);
            }
        }
        if let Some(deadline) = self.flow_control.get_persist_deadline() {
            if deadline <= now {
                self.on_persist_timeout(now);
            }
        }
        if let Some(deadline) = self.ack_deadline {
            if deadline <= now {
                self.send_ack(now);
            }
        }
        if let Some(deadline) = self.time_wait_deadline {
            if deadline <= now {
                debug!("TIME_WAIT expired for {}", self.remote);
                self.state = State::Closed;
                self.cancel_timers();
            }
        }
    }

    fn on_retransmit_timeout(&mut self, now: Instant) {
        if self.retransmits_remaining == 0 {
            let cause: String = format!("retransmission retries to {} exhausted", self.remote);
            error!("on_retransmit_timeout(): {}", cause);
            self.terminate(Fail::connection_timed_out(&cause));
            return;
        }
        self.retransmits_remaining -= 1;

        match self.state {
            State::SynSent | State::SynReceived => {
                // Handshake segments carry no payload; just resend them.
                trace!("retransmitting handshake segment to {}", self.remote);
                if let Err(e) = self.emit_syn(now) {
                    warn!("failed to retransmit handshake segment: {:?}", e);
                }
                self.retransmit_deadline = Some(now + self.config.get_handshake_timeout());
            },
            _ => {
                trace!("retransmission timeout at {}", self.sender.get_send_unacked());
                self.cc.on_rto(self.sender.flight_size());
                self.rto_calculator.back_off();
                self.retransmit(now);
                self.retransmit_deadline = Some(now + self.rto_calculator.rto());
            },
        }
    }

    /// Zero-window probe: push a single byte past the advertised window so a
    /// lost window update cannot stall the connection.
    fn on_persist_timeout(&mut self, now: Instant) {
        if let Some(probe) = self.sender.pop_one_unsent_byte() {
            let seq_num: SeqNumber = self.sender.get_send_next();
            let mut header: SegmentHeader = self.build_header(now);
            header.seq_num = seq_num;
            self.emit(header, &probe, now);

            self.sender.modify_send_next(|s| s + SeqNumber::from(1));
            self.sender.push_unacked_segment(UnackedSegment {
                bytes: probe,
                initial_tx: Option::None,
            });
        } else {
            // No queued data to probe with; a bare ACK still solicits the
            // peer's current window.
            self.send_ack(now);
        }
        self.flow_control.on_persist_timeout(now);
    }

    //==========================================================================
    // Internal helpers
    //==========================================================================

    /// Adopts handshake parameters offered by the peer's SYN (or SYN+ACK).
    fn negotiate(&mut self, header: &SegmentHeader) {
        for option in header.iter_options() {
            match option {
                SegmentOption::MaximumSegmentSize(mss) => {
                    self.negotiated_remote_mss = Some(*mss as usize);
                },
                SegmentOption::WindowScale(scale) => {
                    self.remote_window_scale = *scale;
                    self.local_window_scale = self.config.get_window_scale();
                },
                SegmentOption::SackPermitted => {
                    self.sack_permitted = self.config.get_sack_enabled();
                },
                SegmentOption::Timestamp { value, .. } => {
                    if self.config.get_timestamps_enabled() {
                        self.timestamps_enabled = true;
                        self.ts_recent = *value;
                    }
                },
                _ => (),
            }
        }
    }

    /// Replaces the placeholder components with ones built from the
    /// negotiated handshake parameters.
    fn install_connection_state(&mut self, receive_next: SeqNumber, peer_window: u16, send_start: SeqNumber) {
        let remote_mss: usize = self.remote_mss_from_negotiation();
        let mss: usize = cmp::min(remote_mss, self.config.get_advertised_mss());

        self.sender = Sender::new(send_start, mss, self.config.get_send_buffer_size());
        self.reassembly = ReassemblyBuffer::new(receive_next);
        self.flow_control = FlowControl::new(
            // A handshake segment's window field is never scaled.
            peer_window as u32,
            self.remote_window_scale,
            (self.config.get_receive_window_size() as u32) << self.local_window_scale,
            self.local_window_scale,
            receive_next,
            send_start,
            self.config.get_persist_interval(),
        );

        let mut cc_options: congestion_control::Options = congestion_control::Options::default();
        cc_options.insert_int("initial_cwnd_mss".to_string(), self.config.get_initial_cwnd_mss() as i64);
        self.cc = congestion_control::Reno::new(mss, send_start, Some(cc_options));
    }

    // Stashed by negotiate(); the MSS option is only ever present in
    // handshake segments.
    fn remote_mss_from_negotiation(&self) -> usize {
        self.negotiated_remote_mss.unwrap_or(FALLBACK_MSS)
    }

    /// Tears the connection down to CLOSED with a latched failure. All
    /// timers die and all buffered data is released.
    fn terminate(&mut self, failure: Fail) {
        self.state = State::Closed;
        self.terminal_failure = Some(failure);
        self.cancel_timers();
        self.reassembly = ReassemblyBuffer::new(self.reassembly.receive_next());
        self.sender = Sender::new(
            self.sender.get_send_next(),
            self.sender.get_mss(),
            self.config.get_send_buffer_size(),
        );
    }

    fn cancel_timers(&mut self) {
        self.retransmit_deadline = Option::None;
        self.ack_deadline = Option::None;
        self.time_wait_deadline = Option::None;
        self.flow_control.cancel_persist();
    }
}
