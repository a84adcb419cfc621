//! Collateral identity and the signal envelope that flows along it.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A signal tagged with the name of the collateral it travelled on.
///
/// Pure value; freely copyable. The engine never mutates or deep-clones the
/// payload on a caller's behalf — treat it as read-only once emitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub collateral_name: String,
    pub payload: serde_json::Value,
}

impl Signal {
    pub fn new(collateral_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            collateral_name: collateral_name.into(),
            payload,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.collateral_name, self.payload)
    }
}

/// A named, typed channel identity.
///
/// Two collaterals are the same channel iff their `name`s are equal — there
/// is no global registry, and the engine only ever keys on the string name.
/// The `T` parameter is a builder-side convenience (it lets `make_signal`
/// check the payload type at the call site); it has no runtime existence and
/// does not change scheduler behaviour.
pub struct Collateral<T = serde_json::Value> {
    name: Arc<str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Collateral<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Serialize> Collateral<T> {
    /// Build a signal tagged with this collateral's name from a typed
    /// payload. Serialization failure surfaces as `Error::InvalidPayload`
    /// rather than panicking, since a reaction's return value is user data.
    pub fn make_signal(&self, payload: T) -> Result<Signal> {
        let value = serde_json::to_value(payload).map_err(|source| Error::InvalidPayload {
            collateral: self.name.to_string(),
            message: source.to_string(),
        })?;
        Ok(Signal::new(self.name.to_string(), value))
    }
}

impl Collateral<()> {
    /// Convenience for payload-less collaterals: `makeSignal()` in the
    /// source spec.
    pub fn make_empty_signal(&self) -> Signal {
        Signal::new(self.name.to_string(), serde_json::Value::Null)
    }
}

impl<T> Clone for Collateral<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Collateral<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collateral").field("name", &self.name).finish()
    }
}

/// Construct a named collateral. Mirrors the source's `collateral<T>(name)`
/// free function.
pub fn collateral<T>(name: impl Into<String>) -> Collateral<T> {
    Collateral::new(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Payload {
        value: i64,
    }

    #[test]
    fn make_signal_tags_with_collateral_name() {
        let c = collateral::<Payload>("numbers");
        let signal = c.make_signal(Payload { value: 7 }).unwrap();
        assert_eq!(signal.collateral_name, "numbers");
        assert_eq!(signal.payload["value"], 7);
    }

    #[test]
    fn two_collaterals_with_same_name_are_the_same_channel() {
        let a = collateral::<Payload>("shared");
        let b = collateral::<Payload>("shared");
        assert_eq!(a.name(), b.name());
    }
}
