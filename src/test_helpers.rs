// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    config::TransportConfig,
    fail::Fail,
    peer::Peer,
    runtime::NetworkRuntime,
};
use ::flexi_logger::Logger;
use ::std::{
    cell::RefCell,
    collections::VecDeque,
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    rc::Rc,
    sync::Once,
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Constants
//==============================================================================

pub const ALICE_IPV4: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
pub const BOB_IPV4: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

/// MSS used throughout the tests; round numbers keep window math readable.
pub const TEST_MSS: usize = 1000;

static INIT_LOG: Once = Once::new();

pub fn initialize() {
    INIT_LOG.call_once(|| {
        Logger::try_with_env_or_str("")
            .expect("test logger spec should parse")
            .start()
            .expect("test logger should start");
    });
}

//==============================================================================
// Structures
//==============================================================================

/// An in-memory datagram substrate: every transmitted datagram lands on a
/// queue the test inspects and forwards (or drops, reorders, duplicates) by
/// hand.
pub struct TestRuntime {
    outgoing: Rc<RefCell<VecDeque<(SocketAddrV4, Vec<u8>)>>>,
}

impl NetworkRuntime for TestRuntime {
    fn transmit(&mut self, remote: SocketAddrV4, datagram: Vec<u8>) -> Result<(), Fail> {
        self.outgoing.borrow_mut().push_back((remote, datagram));
        Ok(())
    }
}

/// One side of a simulated connection: a transport peer plus a handle onto
/// the frames it has emitted.
pub struct TestPeer {
    pub peer: Peer<TestRuntime>,
    pub ip: Ipv4Addr,
    outgoing: Rc<RefCell<VecDeque<(SocketAddrV4, Vec<u8>)>>>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl TestPeer {
    pub fn new(ip: Ipv4Addr, nonce: u32, now: Instant) -> Self {
        Self::new_with_config(ip, nonce, test_config(), now)
    }

    /// Builds a peer with a non-default configuration (window scale, window
    /// size, and so on).
    pub fn new_with_config(ip: Ipv4Addr, nonce: u32, config: TransportConfig, now: Instant) -> Self {
        initialize();
        let outgoing: Rc<RefCell<VecDeque<(SocketAddrV4, Vec<u8>)>>> = Rc::new(RefCell::new(VecDeque::new()));
        let rt: TestRuntime = TestRuntime {
            outgoing: outgoing.clone(),
        };
        let peer: Peer<TestRuntime> = Peer::new_with_nonce(rt, config, nonce, now);
        Self { peer, ip, outgoing }
    }

    /// Pops the oldest frame this peer has emitted.
    pub fn pop_frame(&mut self) -> Vec<u8> {
        let (_, frame): (SocketAddrV4, Vec<u8>) = self
            .outgoing
            .borrow_mut()
            .pop_front()
            .expect("a frame should have been emitted");
        frame
    }

    pub fn try_pop_frame(&mut self) -> Option<Vec<u8>> {
        self.outgoing.borrow_mut().pop_front().map(|(_, frame)| frame)
    }

    pub fn frame_count(&self) -> usize {
        self.outgoing.borrow().len()
    }

    pub fn drop_all_frames(&mut self) {
        self.outgoing.borrow_mut().clear();
    }

    /// Hands a raw datagram from `src` to this peer's demultiplexer.
    pub fn deliver(&mut self, src: Ipv4Addr, datagram: &[u8], now: Instant) {
        self.peer.receive_datagram(self.ip, src, datagram, now);
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Deterministic defaults sized for tests: a short MSL so TIME_WAIT tests
/// finish quickly, and a round MSS.
pub fn test_config() -> TransportConfig {
    TransportConfig::default()
        .set_advertised_mss(TEST_MSS)
        .set_msl(Duration::from_secs(1))
}

pub fn new_alice(now: Instant) -> TestPeer {
    TestPeer::new(ALICE_IPV4, 0x1234_5678, now)
}

pub fn new_bob(now: Instant) -> TestPeer {
    TestPeer::new(BOB_IPV4, 0x8765_4321, now)
}

/// Advances the simulated clock and lets both peers run their timers.
pub fn advance_clock(alice: Option<&mut TestPeer>, bob: Option<&mut TestPeer>, now: &mut Instant, delta: Duration) {
    *now += delta;
    if let Some(alice) = alice {
        alice.peer.poll(*now);
    }
    if let Some(bob) = bob {
        bob.peer.poll(*now);
    }
}

/// Forwards every frame `from` has emitted to `to`, in order.
pub fn deliver_all(from: &mut TestPeer, to: &mut TestPeer, now: Instant) {
    while let Some(frame) = from.try_pop_frame() {
        to.deliver(from.ip, &frame, now);
    }
}
