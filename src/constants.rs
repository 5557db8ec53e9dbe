// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::time::Duration;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Fallback MSS used when the peer does not advertise one in its SYN.
pub const FALLBACK_MSS: usize = 536;

/// Minimum MSS we accept from configuration.
pub const MIN_MSS: usize = FALLBACK_MSS;

/// Maximum MSS we accept from configuration.
pub const MAX_MSS: usize = u16::max_value() as usize;

/// Default MSS advertised in our SYN segments.
pub const DEFAULT_MSS: usize = 1450;

/// Delay timeout for ACKs.
/// See: https://www.rfc-editor.org/rfc/rfc5681#section-4.2
pub const ACK_DELAY_TIMEOUT: Duration = Duration::from_millis(200);

/// Full segments received before an ACK is forced out (delayed-ACK threshold).
pub const ACK_DELAY_SEGMENTS: u32 = 2;

/// Timeout for one handshake attempt.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Number of handshake attempts before giving up.
pub const HANDSHAKE_RETRIES: usize = 5;

/// Number of consecutive retransmission timeouts before the connection aborts.
pub const RETRANSMIT_RETRIES: usize = 12;

/// Maximum Segment Lifetime. TIME_WAIT lasts twice this.
pub const MSL: Duration = Duration::from_secs(30);

/// Base interval between zero-window probes. Doubles on each unanswered probe.
pub const PERSIST_INTERVAL: Duration = Duration::from_secs(1);

/// Initial congestion window, in units of MSS.
/// Modern stacks start around here; see RFC 6928.
pub const INITIAL_CWND_MSS: u32 = 10;

/// Largest window-scale shift allowed by RFC 1323.
pub const MAX_WINDOW_SCALE: u8 = 14;
