// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Addressable references
//!
//! The `reference` module provides the [`AddressableReference`] type, the identifier of a
//! remote-callable target. A reference is made of an interface identifier, an optional identity
//! key (absent for singletons) and an optional node address (absent for objects that live in the
//! local process).
//!

use serde::{Deserialize, Serialize};

use std::fmt::{Display, Formatter};

/// Interface type identifier.
///
/// Identifies the remote-callable interface a reference points to. Method identifiers are scoped
/// to an interface, so the pair (interface, method) is what names a method across processes.
///
#[derive(
    Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct InterfaceId(String);

impl InterfaceId {
    /// Creates a new interface identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The interface name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InterfaceId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl Display for InterfaceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of an actor within its interface.
#[derive(
    Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Key {
    /// String identity.
    Str(String),
    /// Numeric identity.
    Int(i64),
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key::Str(key.to_owned())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key::Str(key)
    }
}

impl From<i64> for Key {
    fn from(key: i64) -> Self {
        Key::Int(key)
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Str(key) => f.write_str(key),
            Key::Int(key) => write!(f, "{}", key),
        }
    }
}

/// Address of a node in the cluster.
#[derive(
    Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeAddress(String);

impl NodeAddress {
    /// Creates a new node address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }
}

impl Display for NodeAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a remote-callable target.
///
/// Two references are equal if and only if their interface, identity and node address are equal.
/// References are immutable once created; the builder-style methods return new values.
///
/// # Examples
///
/// ```ignore
/// use runtime::{AddressableReference, NodeAddress};
///
/// let local = AddressableReference::new("Account", "alice");
/// let remote = local.clone().at(NodeAddress::new("10.0.0.2:7000"));
/// assert_ne!(local, remote);
/// assert!(local.is_local());
/// ```
///
#[derive(
    Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct AddressableReference {
    interface: InterfaceId,
    identity: Option<Key>,
    node: Option<NodeAddress>,
}

impl AddressableReference {
    /// Creates a reference to the actor `identity` of `interface`.
    pub fn new(interface: impl Into<InterfaceId>, identity: impl Into<Key>) -> Self {
        Self {
            interface: interface.into(),
            identity: Some(identity.into()),
            node: None,
        }
    }

    /// Creates a reference to the singleton of `interface`.
    pub fn singleton(interface: impl Into<InterfaceId>) -> Self {
        Self {
            interface: interface.into(),
            identity: None,
            node: None,
        }
    }

    /// Returns the same reference bound to a node address.
    pub fn at(self, node: NodeAddress) -> Self {
        Self {
            node: Some(node),
            ..self
        }
    }

    /// Interface identifier of the target.
    pub fn interface(&self) -> &InterfaceId {
        &self.interface
    }

    /// Identity of the target, `None` for singletons.
    pub fn identity(&self) -> Option<&Key> {
        self.identity.as_ref()
    }

    /// Node the target is bound to, `None` for local-process objects.
    pub fn node(&self) -> Option<&NodeAddress> {
        self.node.as_ref()
    }

    /// True when the reference is not bound to a node address.
    pub fn is_local(&self) -> bool {
        self.node.is_none()
    }
}

impl Display for AddressableReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.interface)?;
        if let Some(identity) = &self.identity {
            write!(f, "/{}", identity)?;
        }
        if let Some(node) = &self.node {
            write!(f, "@{}", node)?;
        }
        Ok(())
    }
}
