//! Core types for streamcore.
//!
//! Names and topics use smart constructors so that a value, once built, is
//! always valid and can be used as a broker identifier or subject segment
//! without further checks.

use crate::validation::{is_concrete_subject, is_identifier, is_subject_token};
use nutype::nutype;
use serde::{Deserialize, Serialize};

/// Identifier of a durable log (a broker stream).
///
/// `StreamName` values are non-empty, at most 255 characters and contain only
/// ASCII alphanumerics, `_` and `-`.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255, predicate = is_identifier),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct StreamName(String);

/// Name of a publisher or subscriber instance.
///
/// Subscriber names double as durable consumer names, so they follow the same
/// syntax as [`StreamName`].
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255, predicate = is_identifier),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct InstanceName(String);

/// A subscription topic: one or more subject tokens separated by `.`.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255, predicate = is_concrete_subject),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Topic(String);

/// The subject namespacing convention: `name.region.tier.<topic>...`.
///
/// Every stream captures `name.region.tier.>` and every subscription filters
/// on `name.region.tier.<topic>.>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Application or product namespace
    pub name: String,
    /// Deployment region
    pub region: String,
    /// Service tier
    pub tier: String,
}

impl Namespace {
    /// Creates a namespace from its three segments.
    pub fn new(
        name: impl Into<String>,
        region: impl Into<String>,
        tier: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            tier: tier.into(),
        }
    }

    /// Returns the first segment that is not a valid subject token.
    pub(crate) fn invalid_segment(&self) -> Option<(&'static str, &str)> {
        [
            ("name", self.name.as_str()),
            ("region", self.region.as_str()),
            ("tier", self.tier.as_str()),
        ]
        .into_iter()
        .find(|(_, segment)| !is_subject_token(segment))
    }

    /// `name.region.tier`
    pub fn prefix(&self) -> String {
        format!("{}.{}.{}", self.name, self.region, self.tier)
    }

    /// Subject set captured by a stream in this namespace: `name.region.tier.>`.
    pub fn wildcard(&self) -> String {
        format!("{}.>", self.prefix())
    }

    /// Filter subject of a subscription: `name.region.tier.topic.>`.
    pub fn filter(&self, topic: &Topic) -> String {
        format!("{}.{}.>", self.prefix(), topic.as_ref())
    }

    /// Concrete subject for publishing under `topic`: `name.region.tier.topic.key`.
    pub fn subject(&self, topic: &Topic, key: &str) -> String {
        format!("{}.{}.{}", self.prefix(), topic.as_ref(), key)
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new("streamcore", "local", "default")
    }
}
