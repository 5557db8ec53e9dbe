// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    config::TransportConfig,
    control_block::{
        ControlBlock,
        State,
    },
    fail::Fail,
    isn_generator::IsnGenerator,
    runtime::NetworkRuntime,
    segment::SegmentHeader,
};
use ::libc::{
    EADDRINUSE,
    EINVAL,
    ENOTCONN,
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::{
    cell::RefCell,
    collections::{
        HashMap,
        VecDeque,
    },
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    rc::Rc,
    time::Instant,
};

//==============================================================================
// Structures
//==============================================================================

/// A connection is identified by its 4-tuple: (local, remote).
pub type ConnectionId = (SocketAddrV4, SocketAddrV4);

struct Listener {
    backlog: usize,
    // Connections still completing their handshake.
    pending: VecDeque<ConnectionId>,
    // Established connections waiting for an accept() call.
    ready: VecDeque<ConnectionId>,
}

/// The transport endpoint: owns every connection on this host side, the
/// listening sockets, and the demultiplexer that routes inbound datagrams to
/// the right control block.
///
/// Like the control blocks it owns, a `Peer` is sans-I/O: the substrate
/// feeds datagrams in through `receive_datagram` and the clock in through
/// `poll`, both with an explicit `now`. Different `Peer`s share nothing and
/// may live on different threads.
pub struct Peer<RT: NetworkRuntime> {
    rt: Rc<RefCell<RT>>,
    config: TransportConfig,
    isn_generator: IsnGenerator,
    connections: HashMap<ConnectionId, ControlBlock<RT>>,
    listeners: HashMap<SocketAddrV4, Listener>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl<RT: NetworkRuntime> Peer<RT> {
    pub fn new(rt: RT, config: TransportConfig, now: Instant) -> Self {
        let mut rng: SmallRng = SmallRng::from_entropy();
        let nonce: u32 = rng.gen();
        Self {
            rt: Rc::new(RefCell::new(rt)),
            config,
            isn_generator: IsnGenerator::new(nonce, now),
            connections: HashMap::new(),
            listeners: HashMap::new(),
        }
    }

    /// Test entry point: a fixed nonce makes ISNs reproducible.
    pub fn new_with_nonce(rt: RT, config: TransportConfig, nonce: u32, now: Instant) -> Self {
        Self {
            rt: Rc::new(RefCell::new(rt)),
            config,
            isn_generator: IsnGenerator::new(nonce, now),
            connections: HashMap::new(),
            listeners: HashMap::new(),
        }
    }

    //==========================================================================
    // Application interface
    //==========================================================================

    /// Active open: begins the three-way handshake toward `remote`.
    pub fn connect(&mut self, local: SocketAddrV4, remote: SocketAddrV4, now: Instant) -> Result<ConnectionId, Fail> {
        let id: ConnectionId = (local, remote);
        if self.connections.contains_key(&id) {
            return Err(Fail::new(EADDRINUSE, "connection already exists"));
        }

        let iss = self.isn_generator.generate(&local, &remote, now);
        let cb: ControlBlock<RT> =
            ControlBlock::open_active(local, remote, self.rt.clone(), self.config.clone(), iss, now)?;
        self.connections.insert(id, cb);
        Ok(id)
    }

    /// Passive open: starts accepting connection requests on `local`.
    pub fn listen(&mut self, local: SocketAddrV4, backlog: usize) -> Result<(), Fail> {
        if self.listeners.contains_key(&local) {
            return Err(Fail::new(EADDRINUSE, "address already in use"));
        }
        self.listeners.insert(
            local,
            Listener {
                backlog: backlog.max(1),
                pending: VecDeque::new(),
                ready: VecDeque::new(),
            },
        );
        Ok(())
    }

    /// Pops one established connection off the listener's ready queue, or
    /// EWOULDBLOCK if none has completed its handshake yet.
    pub fn accept(&mut self, local: SocketAddrV4) -> Result<ConnectionId, Fail> {
        let listener: &mut Listener = self
            .listeners
            .get_mut(&local)
            .ok_or_else(|| Fail::new(EINVAL, "socket is not listening"))?;
        listener
            .ready
            .pop_front()
            .ok_or_else(|| Fail::would_block("no pending connections"))
    }

    pub fn send(&mut self, id: ConnectionId, buf: &[u8], now: Instant) -> Result<usize, Fail> {
        self.connection_mut(id)?.send(buf, now)
    }

    pub fn receive(&mut self, id: ConnectionId, max_bytes: usize, now: Instant) -> Result<Vec<u8>, Fail> {
        self.connection_mut(id)?.receive(max_bytes, now)
    }

    pub fn close(&mut self, id: ConnectionId, now: Instant) -> Result<(), Fail> {
        self.connection_mut(id)?.close(now)
    }

    pub fn shutdown_write(&mut self, id: ConnectionId, now: Instant) -> Result<(), Fail> {
        self.connection_mut(id)?.shutdown_write(now)
    }

    pub fn state(&self, id: ConnectionId) -> Option<State> {
        self.connections.get(&id).map(|cb| cb.state())
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&ControlBlock<RT>> {
        self.connections.get(&id)
    }

    /// Drops a fully closed connection's state. Removing a live connection
    /// is refused; close it first.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Result<(), Fail> {
        match self.connections.get(&id) {
            Some(cb) if cb.state() == State::Closed => {
                self.connections.remove(&id);
                Ok(())
            },
            Some(_) => Err(Fail::new(EINVAL, "connection is still active")),
            None => Err(Fail::new(ENOTCONN, "no such connection")),
        }
    }

    //==========================================================================
    // Substrate interface
    //==========================================================================

    /// Routes one inbound datagram. Malformed datagrams are dropped here,
    /// silently except for a trace, matching the substrate's best-effort
    /// model.
    pub fn receive_datagram(&mut self, local_ip: Ipv4Addr, remote_ip: Ipv4Addr, datagram: &[u8], now: Instant) {
        let (header, data): (SegmentHeader, Vec<u8>) = match SegmentHeader::parse(&local_ip, &remote_ip, datagram) {
            Ok(parsed) => parsed,
            Err(e) => {
                trace!("dropping malformed segment from {}: {:?}", remote_ip, e);
                return;
            },
        };

        let local: SocketAddrV4 = SocketAddrV4::new(local_ip, header.dst_port);
        let remote: SocketAddrV4 = SocketAddrV4::new(remote_ip, header.src_port);
        let id: ConnectionId = (local, remote);

        if let Some(cb) = self.connections.get_mut(&id) {
            cb.on_segment_received(&header, data, now);
            self.reap_handshakes(local, now);
            return;
        }

        // No connection: a SYN may create one if something is listening.
        if header.syn && !header.ack && !header.rst {
            self.on_inbound_syn(local, remote, &header, now);
        } else {
            trace!("no connection for segment from {}", remote);
        }
    }

    fn on_inbound_syn(&mut self, local: SocketAddrV4, remote: SocketAddrV4, header: &SegmentHeader, now: Instant) {
        let listener: &mut Listener = match self.listeners.get_mut(&local) {
            Some(listener) => listener,
            None => {
                trace!("SYN for non-listening address {}", local);
                return;
            },
        };
        if listener.pending.len() + listener.ready.len() >= listener.backlog {
            debug!("backlog full on {}; dropping SYN from {}", local, remote);
            return;
        }

        let id: ConnectionId = (local, remote);
        let iss = self.isn_generator.generate(&local, &remote, now);
        match ControlBlock::open_passive(local, remote, self.rt.clone(), self.config.clone(), iss, header, now) {
            Ok(cb) => {
                listener.pending.push_back(id);
                self.connections.insert(id, cb);
            },
            Err(e) => warn!("passive open for {} failed: {:?}", remote, e),
        }
    }

    /// Moves handshakes that just completed from the pending queue to the
    /// ready queue, and reaps ones that died.
    fn reap_handshakes(&mut self, local: SocketAddrV4, _now: Instant) {
        let listener: &mut Listener = match self.listeners.get_mut(&local) {
            Some(listener) => listener,
            None => return,
        };

        let mut index: usize = 0;
        while index < listener.pending.len() {
            let id: ConnectionId = listener.pending[index];
            match self.connections.get(&id).map(|cb| cb.state()) {
                Some(State::Established) => {
                    listener.pending.remove(index);
                    listener.ready.push_back(id);
                },
                Some(State::Closed) | None => {
                    // Handshake aborted (RST or timeout); forget it.
                    listener.pending.remove(index);
                    self.connections.remove(&id);
                },
                _ => index += 1,
            }
        }
    }

    //==========================================================================
    // Clock interface
    //==========================================================================

    /// Fires expired timers on every connection. Drivers should call this
    /// whenever `next_deadline` passes.
    pub fn poll(&mut self, now: Instant) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            if let Some(cb) = self.connections.get_mut(&id) {
                cb.on_timer(now);
            }
            self.reap_handshakes(id.0, now);
        }
    }

    /// Earliest deadline across all connections.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.connections.values().filter_map(|cb| cb.next_deadline()).min()
    }

    fn connection_mut(&mut self, id: ConnectionId) -> Result<&mut ControlBlock<RT>, Fail> {
        self.connections
            .get_mut(&id)
            .ok_or_else(|| Fail::new(ENOTCONN, "no such connection"))
    }
}
