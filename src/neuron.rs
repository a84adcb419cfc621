//! Neurons and dendrites (C3, C4).

use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::axon::Axon;
use crate::error::{Error, Result};
use crate::reaction::Reaction;

/// A binding of an input collateral to a reaction, owned by exactly one
/// neuron. Order within a neuron's `dendrites` is preserved and is the sole
/// tie-break for deterministic enumeration (P6).
pub struct Dendrite {
    pub input_collateral_name: String,
    pub reaction: Arc<dyn Reaction>,
    pub owner_neuron_name: String,
}

impl std::fmt::Debug for Dendrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dendrite")
            .field("input_collateral_name", &self.input_collateral_name)
            .field("owner_neuron_name", &self.owner_neuron_name)
            .finish_non_exhaustive()
    }
}

/// A named processing unit owning one axon and an ordered list of
/// dendrites, with an optional per-neuron concurrency cap.
#[derive(Debug)]
pub struct Neuron {
    pub name: String,
    pub axon: Axon,
    pub dendrites: Vec<Dendrite>,
    pub max_concurrency: Option<NonZeroUsize>,
}

/// Builder for [`Neuron`], supporting the `neuron(name, axon).bind(...)`
/// chaining style from §4.2.
pub struct NeuronBuilder {
    name: String,
    axon: Axon,
    dendrites: Vec<Dendrite>,
    max_concurrency: Option<NonZeroUsize>,
}

impl NeuronBuilder {
    pub fn new(name: impl Into<String>, axon: Axon) -> Self {
        Self {
            name: name.into(),
            axon,
            dendrites: Vec::new(),
            max_concurrency: None,
        }
    }

    /// Append a dendrite bound to `input_collateral_name`, driven by
    /// `reaction`. Dendrite order is preserved.
    pub fn bind(mut self, input_collateral_name: impl Into<String>, reaction: Arc<dyn Reaction>) -> Self {
        self.dendrites.push(Dendrite {
            input_collateral_name: input_collateral_name.into(),
            reaction,
            owner_neuron_name: self.name.clone(),
        });
        self
    }

    /// Cap this neuron's concurrency at `n` (shared across stimulations once
    /// built into an `Engine`, §4.7). `n == 0` is a construction error,
    /// raised when `build()` is called.
    pub fn with_concurrency(mut self, n: usize) -> Result<Self> {
        self.max_concurrency = Some(NonZeroUsize::new(n).ok_or_else(|| Error::InvalidConcurrency {
            neuron: self.name.clone(),
            value: n as i64,
        })?);
        Ok(self)
    }

    pub fn build(self) -> Neuron {
        Neuron {
            name: self.name,
            axon: self.axon,
            dendrites: self.dendrites,
            max_concurrency: self.max_concurrency,
        }
    }
}

/// Start building a neuron. Mirrors the source's `neuron(name, axon)` free
/// function.
pub fn neuron(name: impl Into<String>, axon: Axon) -> NeuronBuilder {
    NeuronBuilder::new(name, axon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reaction::{reaction, ReactionOutput};

    #[test]
    fn preserves_dendrite_declaration_order() {
        let noop = reaction(|_p, _a, _c| async { Ok(ReactionOutput::None) });
        let n = neuron("n1", Axon::new())
            .bind("a", noop.clone())
            .bind("b", noop.clone())
            .bind("a", noop)
            .build();
        let order: Vec<&str> = n.dendrites.iter().map(|d| d.input_collateral_name.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "a"]);
    }

    #[test]
    fn zero_concurrency_is_a_construction_error() {
        let result = neuron("n1", Axon::new()).with_concurrency(0);
        assert!(result.is_err());
    }
}
