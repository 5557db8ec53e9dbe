// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use std::collections::HashMap;

#[derive(Clone, Debug)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
}

/// Free-form per-algorithm tuning knobs, keyed by name. Each algorithm
/// documents the keys it understands and ignores the rest.
#[derive(Clone, Debug, Default)]
pub struct Options {
    inner: HashMap<String, OptionValue>,
}

impl Options {
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.inner.get(key).map(|v| match v {
            OptionValue::Bool(b) => *b,
            _ => panic!("Value for {} should be a bool", key),
        })
    }

    pub fn insert_bool(&mut self, key: String, value: bool) {
        self.inner.insert(key, OptionValue::Bool(value));
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.inner.get(key).map(|v| match v {
            OptionValue::Int(i) => *i,
            _ => panic!("Value for {} should be an int", key),
        })
    }

    pub fn insert_int(&mut self, key: String, value: i64) {
        self.inner.insert(key, OptionValue::Int(value));
    }
}
