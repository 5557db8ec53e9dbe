// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::fail::Fail;
use ::std::net::SocketAddrV4;

//==============================================================================
// Traits
//==============================================================================

/// The unreliable datagram substrate underneath the transport engine.
///
/// The engine never talks to the network directly: every serialized segment
/// goes out through this trait, and inbound datagrams are handed to
/// [crate::peer::Peer::receive_datagram] by whoever drives the I/O loop.
/// Delivery may be lost, duplicated, or reordered; the engine assumes nothing.
pub trait NetworkRuntime {
    /// Hands one serialized segment to the substrate for best-effort delivery.
    fn transmit(&mut self, remote: SocketAddrV4, datagram: Vec<u8>) -> Result<(), Fail>;
}
