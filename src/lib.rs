// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! A reliable, ordered, flow- and congestion-controlled byte-stream
//! transport engine. The unreliable datagram substrate is injected through
//! the [runtime::NetworkRuntime] trait; everything above it (handshake,
//! retransmission, reassembly, congestion and flow control, connection
//! teardown) lives here, as a sans-I/O state machine driven by explicit
//! clock values.

#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod config;
pub mod congestion_control;
pub mod constants;
pub mod control_block;
pub mod fail;
pub mod flow_control;
pub mod isn_generator;
pub mod peer;
pub mod reassembly;
pub mod rto;
pub mod runtime;
pub mod segment;
pub mod sender;
pub mod seq_number;

#[cfg(test)]
mod test_helpers;

#[cfg(test)]
mod tests;

pub use self::{
    config::TransportConfig,
    control_block::{
        ControlBlock,
        State,
    },
    fail::Fail,
    peer::{
        ConnectionId,
        Peer,
    },
    runtime::NetworkRuntime,
    seq_number::SeqNumber,
};

/// Asserts that two expressions are equal, failing the enclosing
/// `Result`-returning test instead of panicking.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => {{
        let left = &$left;
        let right = &$right;
        if !(left == right) {
            ::anyhow::bail!(
                "ensure_eq failed: `{}` == `{}` ({:?} vs {:?})",
                stringify!($left),
                stringify!($right),
                left,
                right
            );
        }
    }};
}

/// Asserts that two expressions are not equal, failing the enclosing
/// `Result`-returning test instead of panicking.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr) => {{
        let left = &$left;
        let right = &$right;
        if left == right {
            ::anyhow::bail!(
                "ensure_neq failed: `{}` != `{}` (both {:?})",
                stringify!($left),
                stringify!($right),
                left
            );
        }
    }};
}
