// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::constants::{
    ACK_DELAY_SEGMENTS,
    ACK_DELAY_TIMEOUT,
    DEFAULT_MSS,
    HANDSHAKE_RETRIES,
    HANDSHAKE_TIMEOUT,
    INITIAL_CWND_MSS,
    MAX_MSS,
    MAX_WINDOW_SCALE,
    MIN_MSS,
    MSL,
    PERSIST_INTERVAL,
    RETRANSMIT_RETRIES,
};
use ::std::time::Duration;

//==============================================================================
// Structures
//==============================================================================

/// Transport Configuration Descriptor
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Advertised Maximum Segment Size
    advertised_mss: usize,
    /// Number of Retries for the Handshake Algorithm
    handshake_retries: usize,
    /// Timeout for the Handshake Algorithm
    handshake_timeout: Duration,
    /// Receive Window Size (unscaled)
    receive_window_size: u16,
    /// Scaling Factor for Window Size
    window_scale: u8,
    /// Timeout for Delayed ACKs
    ack_delay_timeout: Duration,
    /// Full segments received before an ACK is forced out
    ack_delay_segments: u32,
    /// Number of consecutive retransmission timeouts before the connection aborts
    retransmit_retries: usize,
    /// Maximum Segment Lifetime (TIME_WAIT lasts twice this)
    msl: Duration,
    /// Base interval between zero-window probes
    persist_interval: Duration,
    /// Initial congestion window, in units of MSS
    initial_cwnd_mss: u32,
    /// Size of the send buffer, in bytes
    send_buffer_size: usize,
    /// Offer the SACK-permitted option in SYN segments?
    sack_enabled: bool,
    /// Offer the timestamps option in SYN segments?
    timestamps_enabled: bool,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for the Transport Configuration Descriptor
impl TransportConfig {
    /// Gets the advertised maximum segment size in the target [TransportConfig].
    pub fn get_advertised_mss(&self) -> usize {
        self.advertised_mss
    }

    /// Gets the number of handshake retries in the target [TransportConfig].
    pub fn get_handshake_retries(&self) -> usize {
        self.handshake_retries
    }

    /// Gets the handshake timeout in the target [TransportConfig].
    pub fn get_handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Gets the receiver window size in the target [TransportConfig].
    pub fn get_receive_window_size(&self) -> u16 {
        self.receive_window_size
    }

    /// Gets the window scale in the target [TransportConfig].
    pub fn get_window_scale(&self) -> u8 {
        self.window_scale
    }

    /// Gets the acknowledgement delay timeout in the target [TransportConfig].
    pub fn get_ack_delay_timeout(&self) -> Duration {
        self.ack_delay_timeout
    }

    /// Gets the acknowledgement delay segment threshold in the target [TransportConfig].
    pub fn get_ack_delay_segments(&self) -> u32 {
        self.ack_delay_segments
    }

    /// Gets the retransmission retry cap in the target [TransportConfig].
    pub fn get_retransmit_retries(&self) -> usize {
        self.retransmit_retries
    }

    /// Gets the TIME_WAIT duration (2 x MSL) in the target [TransportConfig].
    pub fn get_time_wait_duration(&self) -> Duration {
        2 * self.msl
    }

    /// Gets the base zero-window probe interval in the target [TransportConfig].
    pub fn get_persist_interval(&self) -> Duration {
        self.persist_interval
    }

    /// Gets the initial congestion window (in MSS units) in the target [TransportConfig].
    pub fn get_initial_cwnd_mss(&self) -> u32 {
        self.initial_cwnd_mss
    }

    /// Gets the send buffer size in the target [TransportConfig].
    pub fn get_send_buffer_size(&self) -> usize {
        self.send_buffer_size
    }

    /// Gets whether SACK is offered in the target [TransportConfig].
    pub fn get_sack_enabled(&self) -> bool {
        self.sack_enabled
    }

    /// Gets whether timestamps are offered in the target [TransportConfig].
    pub fn get_timestamps_enabled(&self) -> bool {
        self.timestamps_enabled
    }

    /// Sets the advertised maximum segment size in the target [TransportConfig].
    pub fn set_advertised_mss(mut self, value: usize) -> Self {
        assert!(value >= MIN_MSS);
        assert!(value <= MAX_MSS);
        self.advertised_mss = value;
        self
    }

    /// Sets the number of handshake retries in the target [TransportConfig].
    pub fn set_handshake_retries(mut self, value: usize) -> Self {
        assert!(value > 0);
        self.handshake_retries = value;
        self
    }

    /// Sets the handshake timeout in the target [TransportConfig].
    pub fn set_handshake_timeout(mut self, value: Duration) -> Self {
        assert!(!value.is_zero());
        self.handshake_timeout = value;
        self
    }

    /// Sets the receiver window size in the target [TransportConfig].
    pub fn set_receive_window_size(mut self, value: u16) -> Self {
        assert!(value > 0);
        self.receive_window_size = value;
        self
    }

    /// Sets the window scale in the target [TransportConfig].
    pub fn set_window_scale(mut self, value: u8) -> Self {
        assert!(value <= MAX_WINDOW_SCALE);
        self.window_scale = value;
        self
    }

    /// Sets the acknowledgement delay timeout in the target [TransportConfig].
    pub fn set_ack_delay_timeout(mut self, value: Duration) -> Self {
        self.ack_delay_timeout = value;
        self
    }

    /// Sets the acknowledgement delay segment threshold in the target [TransportConfig].
    pub fn set_ack_delay_segments(mut self, value: u32) -> Self {
        assert!(value > 0);
        self.ack_delay_segments = value;
        self
    }

    /// Sets the retransmission retry cap in the target [TransportConfig].
    pub fn set_retransmit_retries(mut self, value: usize) -> Self {
        assert!(value > 0);
        self.retransmit_retries = value;
        self
    }

    /// Sets the maximum segment lifetime in the target [TransportConfig].
    pub fn set_msl(mut self, value: Duration) -> Self {
        self.msl = value;
        self
    }

    /// Sets the base zero-window probe interval in the target [TransportConfig].
    pub fn set_persist_interval(mut self, value: Duration) -> Self {
        assert!(!value.is_zero());
        self.persist_interval = value;
        self
    }

    /// Sets the initial congestion window (in MSS units) in the target [TransportConfig].
    pub fn set_initial_cwnd_mss(mut self, value: u32) -> Self {
        assert!(value > 0);
        self.initial_cwnd_mss = value;
        self
    }

    /// Sets the send buffer size in the target [TransportConfig].
    pub fn set_send_buffer_size(mut self, value: usize) -> Self {
        assert!(value > 0);
        self.send_buffer_size = value;
        self
    }

    /// Sets whether SACK is offered in the target [TransportConfig].
    pub fn set_sack_enabled(mut self, value: bool) -> Self {
        self.sack_enabled = value;
        self
    }

    /// Sets whether timestamps are offered in the target [TransportConfig].
    pub fn set_timestamps_enabled(mut self, value: bool) -> Self {
        self.timestamps_enabled = value;
        self
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Default Trait Implementation for the Transport Configuration Descriptor
impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            advertised_mss: DEFAULT_MSS,
            handshake_retries: HANDSHAKE_RETRIES,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            receive_window_size: 0xffff,
            window_scale: 0,
            ack_delay_timeout: ACK_DELAY_TIMEOUT,
            ack_delay_segments: ACK_DELAY_SEGMENTS,
            retransmit_retries: RETRANSMIT_RETRIES,
            msl: MSL,
            persist_interval: PERSIST_INTERVAL,
            initial_cwnd_mss: INITIAL_CWND_MSS,
            send_buffer_size: 1024 * 1024,
            sack_enabled: true,
            timestamps_enabled: true,
        }
    }
}
