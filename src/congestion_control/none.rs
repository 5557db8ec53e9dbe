// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::{
    CongestionControl,
    FastRetransmitRecovery,
    Options,
    SlowStartCongestionAvoidance,
};
use crate::seq_number::SeqNumber;
use ::std::fmt::Debug;

// Implementation of congestion control which does nothing.
#[derive(Debug)]
pub struct None {}

impl CongestionControl for None {
    fn new(_mss: usize, _seq_no: SeqNumber, _options: Option<Options>) -> Box<dyn CongestionControl> {
        Box::new(Self {})
    }
}

impl SlowStartCongestionAvoidance for None {
    fn get_cwnd(&self) -> u32 {
        u32::MAX
    }
}

impl FastRetransmitRecovery for None {}
