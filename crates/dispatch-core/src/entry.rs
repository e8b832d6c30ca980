//! Identity types shared across the dispatcher: the logical call site
//! ([`Entry`]) and the dedup namespace key ([`FilterKey`]).

use std::fmt;

/// A logical call site: a `service` groups `function`s, and concurrency caps
/// may be requested at either level.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Entry {
    pub service: String,
    pub function: String,
}

impl Entry {
    pub fn new(service: impl Into<String>, function: impl Into<String>) -> Self {
        Entry {
            service: service.into(),
            function: function.into(),
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.function)
    }
}

/// The dedup filter's key: `(service, id)`. Note this is per-*service*, not
/// per-function — two functions on the same service share one dedup
/// namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FilterKey {
    pub service: String,
    pub id: String,
}

impl FilterKey {
    pub fn new(service: impl Into<String>, id: impl Into<String>) -> Self {
        FilterKey {
            service: service.into(),
            id: id.into(),
        }
    }
}
