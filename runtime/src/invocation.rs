// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Invocations
//!
//! An [`Invocation`] is one routed method call: target reference, method identifier, parameters,
//! a one-way flag, cross-cutting headers and an optional completion handle the eventual result is
//! linked to. Parameters and results are dynamic [`Value`]s so that every pipeline stage can
//! inspect, hash and clone them without knowing the actor's concrete types.
//!

use crate::{reference::AddressableReference, task::Task};

use serde::{Deserialize, Serialize};

use std::{
    collections::{BTreeMap, HashMap},
    fmt::{Debug, Formatter},
    sync::Arc,
};

/// Interface-scoped method identifier, stable across processes.
pub type MethodId = u32;

/// Result of an invocation as seen by callers. Shared, so a cached reply can be handed to
/// several callers without copying when its type is immutable.
pub type Reply = Arc<Value>;

/// Dynamic parameter / result value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// No value.
    Unit,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Enum constant of a named type.
    Enum {
        /// Type name.
        type_name: String,
        /// Variant name.
        variant: String,
    },
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map.
    Map(BTreeMap<String, Value>),
    /// Instance of a named record type.
    Object {
        /// Type name.
        type_name: String,
        /// Field values.
        fields: BTreeMap<String, Value>,
    },
}

impl Value {
    /// Builds an object value.
    pub fn object<I, S>(type_name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Value::Object {
            type_name: type_name.to_owned(),
            fields: fields
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }

    /// Integer content, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// String content, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Mutable field of an object value.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        match self {
            Value::Object { fields, .. } | Value::Map(fields) => fields.get_mut(name),
            _ => None,
        }
    }

    /// Field of an object value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object { fields, .. } | Value::Map(fields) => fields.get(name),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

/// One unit of routed work.
///
/// Everything but the headers is fixed at construction. The completion handle, when present,
/// is the task the caller observes; whichever stage finally produces the result links it there.
///
pub struct Invocation {
    reference: AddressableReference,
    method: MethodId,
    args: Vec<Value>,
    one_way: bool,
    headers: Option<HashMap<String, String>>,
    completion: Option<Task<Reply>>,
}

impl Debug for Invocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("reference", &self.reference)
            .field("method", &self.method)
            .field("args", &self.args)
            .field("one_way", &self.one_way)
            .field("headers", &self.headers)
            .finish()
    }
}

impl Invocation {
    /// Creates a request-response invocation without a completion handle.
    pub fn new(
        reference: AddressableReference,
        method: MethodId,
        args: Vec<Value>,
    ) -> Self {
        Self {
            reference,
            method,
            args,
            one_way: false,
            headers: None,
            completion: None,
        }
    }

    /// Marks the invocation as fire-and-forget.
    pub fn one_way(mut self) -> Self {
        self.one_way = true;
        self
    }

    /// Attaches the completion handle the result must be linked to.
    pub fn with_completion(mut self, completion: Task<Reply>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Target reference.
    pub fn reference(&self) -> &AddressableReference {
        &self.reference
    }

    /// Method identifier.
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Parameters.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// True for fire-and-forget invocations.
    pub fn is_one_way(&self) -> bool {
        self.one_way
    }

    /// Header value, if set.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|headers| headers.get(name))
            .map(String::as_str)
    }

    /// Sets a header.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
    }

    /// All headers, if any were set.
    pub fn headers(&self) -> Option<&HashMap<String, String>> {
        self.headers.as_ref()
    }

    /// Completion handle, if any.
    pub fn completion(&self) -> Option<&Task<Reply>> {
        self.completion.as_ref()
    }

    /// Detaches the completion handle, leaving the invocation without one.
    pub fn take_completion(&mut self) -> Option<Task<Reply>> {
        self.completion.take()
    }

    /// Splits the invocation into its dispatch parts.
    pub fn into_parts(self) -> (AddressableReference, MethodId, Vec<Value>, Option<Task<Reply>>) {
        (self.reference, self.method, self.args, self.completion)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_headers() {
        let mut invocation =
            Invocation::new(AddressableReference::new("Account", "a"), 1, vec![]);
        assert!(invocation.headers().is_none());
        invocation.set_header("trace-id", "abc");
        assert_eq!(invocation.header("trace-id"), Some("abc"));
        assert_eq!(invocation.header("tx-id"), None);
    }

    #[test]
    fn test_completion_detach() {
        let completion = Task::new();
        let mut invocation =
            Invocation::new(AddressableReference::new("Account", "a"), 1, vec![])
                .one_way()
                .with_completion(completion);
        assert!(invocation.is_one_way());
        assert!(invocation.take_completion().is_some());
        assert!(invocation.completion().is_none());
    }

    #[test]
    fn test_object_fields() {
        let mut value = Value::object("Balance", [("amount", Value::Int(10))]);
        *value.field_mut("amount").unwrap() = Value::Int(11);
        assert_eq!(value.field("amount").and_then(Value::as_int), Some(11));
        assert_eq!(Value::from("x").as_str(), Some("x"));
    }
}
