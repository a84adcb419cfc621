//! A neuron's local mapping from output key to collateral.

use std::collections::HashSet;

/// A neuron's axon: a finite mapping from a local output key (a convenience
/// for the reaction's return value) to the collateral it is wired to.
///
/// The scheduler never inspects the keys — only the *set* of collateral
/// names reachable through an axon matters for edge construction (§4.3).
///
/// Backed by an insertion-ordered `Vec` rather than a `HashMap`: network
/// construction iterates [`collateral_names`](Axon::collateral_names) to
/// build graph edges, and §4.3 requires that construction be deterministic
/// ("neurons visited in insertion order, dendrites in declaration order") —
/// a `HashMap`'s iteration order would make edge insertion order, and so
/// petgraph's SCC numbering, vary from run to run.
#[derive(Debug, Clone, Default)]
pub struct Axon {
    outputs: Vec<(String, String)>,
}

impl Axon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local output key bound to a collateral name. Re-declaring
    /// an existing key updates its collateral in place, preserving the key's
    /// original position.
    pub fn with_output(mut self, key: impl Into<String>, collateral_name: impl Into<String>) -> Self {
        let key = key.into();
        let collateral_name = collateral_name.into();
        match self.outputs.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = collateral_name,
            None => self.outputs.push((key, collateral_name)),
        }
        self
    }

    /// Look up the collateral name bound to a local output key.
    pub fn collateral_name(&self, key: &str) -> Option<&str> {
        self.outputs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// The distinct set of collateral names this axon can emit on, in
    /// declaration order. Used by network construction to build edges;
    /// duplicates across keys collapse to their first occurrence.
    pub fn collateral_names(&self) -> impl Iterator<Item = &str> {
        let mut seen = HashSet::new();
        self.outputs.iter().filter_map(move |(_, name)| {
            if seen.insert(name.as_str()) {
                Some(name.as_str())
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_distinct_collateral_names() {
        let axon = Axon::new()
            .with_output("ok", "success")
            .with_output("err", "failure")
            .with_output("retry", "success");
        let mut names: Vec<&str> = axon.collateral_names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["failure", "success"]);
    }

    #[test]
    fn looks_up_by_local_key() {
        let axon = Axon::new().with_output("ok", "success");
        assert_eq!(axon.collateral_name("ok"), Some("success"));
        assert_eq!(axon.collateral_name("missing"), None);
    }
}
