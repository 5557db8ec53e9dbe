// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::libc::{
    c_int,
    EIO,
};
use ::std::{
    error,
    fmt,
    io,
};

//==============================================================================
// Structures
//==============================================================================

/// Failure
#[derive(Clone)]
pub struct Fail {
    /// Error code.
    pub errno: c_int,
    /// Cause.
    pub cause: String,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Failures
impl Fail {
    /// Creates a new Failure
    pub fn new(errno: i32, cause: &str) -> Self {
        Self {
            errno,
            cause: cause.to_string(),
        }
    }

    /// The remote was unreachable or actively refused the connection request.
    pub fn connect_failed(cause: &str) -> Self {
        Self::new(libc::ECONNREFUSED, cause)
    }

    /// The peer sent a RST, or a local invariant violation was detected mid-connection.
    pub fn connection_reset(cause: &str) -> Self {
        Self::new(libc::ECONNRESET, cause)
    }

    /// Retransmission retries were exhausted without a response from the peer.
    pub fn connection_timed_out(cause: &str) -> Self {
        Self::new(libc::ETIMEDOUT, cause)
    }

    /// The bounded send buffer is full. Recoverable: retry after the buffer drains.
    pub fn buffer_full(cause: &str) -> Self {
        Self::new(libc::EAGAIN, cause)
    }

    /// No data is currently available; the caller should retry after more input arrives.
    pub fn would_block(cause: &str) -> Self {
        Self::new(libc::EWOULDBLOCK, cause)
    }

    /// A segment failed checksum or length validation. Never surfaced to the application;
    /// segments that fail to parse are silently dropped at the transport boundary.
    pub fn malformed_segment(cause: &str) -> Self {
        Self::new(libc::EBADMSG, cause)
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Display Trait Implementation for Failures
impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Debug trait Implementation for Failures
impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Error Trait Implementation for Failures
impl error::Error for Fail {}

/// Conversion Trait Implementation for Fail
impl From<io::Error> for Fail {
    fn from(_: io::Error) -> Self {
        Self {
            errno: EIO,
            cause: "I/O error".to_string(),
        }
    }
}
