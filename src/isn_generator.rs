// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::seq_number::SeqNumber;
use ::std::{
    net::SocketAddrV4,
    num::Wrapping,
    time::Instant,
};

//==============================================================================
// Structures
//==============================================================================

/// Initial sequence number generator.
///
/// An ISN must not be predictable from a plain counter, or an off-path
/// attacker can inject segments into a connection it cannot observe. Each ISN
/// combines a CRC-32 hash over the connection 4-tuple and a per-peer secret
/// nonce with a monotonic-clock component (one tick per 4us, following the
/// classic RFC 793 ISN clock), plus a small counter so that back-to-back
/// connections to the same endpoint still diverge.
pub struct IsnGenerator {
    nonce: u32,
    counter: Wrapping<u16>,
    epoch: Instant,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl IsnGenerator {
    pub fn new(nonce: u32, epoch: Instant) -> Self {
        Self {
            nonce,
            counter: Wrapping(0),
            epoch,
        }
    }

    pub fn generate(&mut self, local: &SocketAddrV4, remote: &SocketAddrV4, now: Instant) -> SeqNumber {
        let crc: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_CKSUM);
        let mut digest = crc.digest();
        digest.update(&remote.ip().octets());
        digest.update(&remote.port().to_be_bytes());
        digest.update(&local.ip().octets());
        digest.update(&local.port().to_be_bytes());
        digest.update(&self.nonce.to_be_bytes());
        let digest: u32 = digest.finalize();

        let clock: u32 = (now.duration_since(self.epoch).as_micros() / 4) as u32;
        let isn: SeqNumber = SeqNumber::from(digest.wrapping_add(clock).wrapping_add(self.counter.0 as u32));
        self.counter += Wrapping(1);
        isn
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
