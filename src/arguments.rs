// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Argument and Header Tables
//!
//! Declare calls, bindings and message headers all carry an open-ended
//! `string -> scalar` mapping. This module defines that mapping and converts it
//! into the `FieldTable` format lapin puts on the wire.

use lapin::types::{AMQPValue, FieldTable, LongInt, LongLongInt, LongString, ShortString};
use std::collections::BTreeMap;

/// A scalar value stored in an argument or header table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value as i64)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&FieldValue> for AMQPValue {
    /// Integers that fit in 32 bits are sent as `long-int`, which every broker
    /// argument accepts; larger values fall back to `long-long-int`.
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::String(v) => AMQPValue::LongString(LongString::from(v.as_str())),
            FieldValue::Int(v) => match i32::try_from(*v) {
                Ok(small) => AMQPValue::LongInt(LongInt::from(small)),
                Err(_) => AMQPValue::LongLongInt(LongLongInt::from(*v)),
            },
            FieldValue::Bool(v) => AMQPValue::Boolean(*v),
        }
    }
}

/// Arguments passed to exchange/queue declarations, bindings and consumers.
pub type Arguments = BTreeMap<String, FieldValue>;

/// Caller supplied message headers.
pub type Headers = BTreeMap<String, FieldValue>;

/// Converts an optional argument mapping into a lapin `FieldTable`.
///
/// Absent arguments produce an empty table.
pub fn to_field_table(arguments: Option<&Arguments>) -> FieldTable {
    let mut table = FieldTable::default();
    if let Some(arguments) = arguments {
        for (key, value) in arguments {
            table.insert(ShortString::from(key.as_str()), AMQPValue::from(value));
        }
    }
    table
}

/// Layers `headers` on top of an existing wire header table.
///
/// Entries already present under the same key are replaced.
pub(crate) fn merge_headers(table: &mut BTreeMap<ShortString, AMQPValue>, headers: &Headers) {
    for (key, value) in headers {
        table.insert(ShortString::from(key.as_str()), AMQPValue::from(value));
    }
}
