//! Static graph index derived once from a neuron list (C5): subscriber
//! lookup, SCC decomposition, and SCC reachability.

use std::collections::{HashMap, HashSet};

use petgraph::algo::{condensation, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{Error, Result};
use crate::neuron::{Dendrite, Neuron};

/// Immutable, built-once index over a set of neurons.
///
/// `Network::build` is the only way to obtain one; nothing about it changes
/// afterwards, so it is safe to share read-only across concurrently running
/// stimulations (§5).
pub struct Network {
    neurons: Vec<Neuron>,
    name_to_index: HashMap<String, usize>,
    /// collateral name -> ordered list of (neuron index, dendrite index)
    subscribers: HashMap<String, Vec<(usize, usize)>>,
    /// neuron index -> SCC index
    scc_index: Vec<usize>,
    /// SCC index -> member neuron indices
    scc_members: Vec<Vec<usize>>,
    /// SCC index -> reachable SCC indices, reflexive
    scc_reachable: Vec<HashSet<usize>>,
}

impl Network {
    pub fn build(neurons: Vec<Neuron>) -> Result<Self> {
        let mut name_to_index = HashMap::with_capacity(neurons.len());
        for (idx, n) in neurons.iter().enumerate() {
            if name_to_index.insert(n.name.clone(), idx).is_some() {
                return Err(Error::DuplicateNeuron(n.name.clone()));
            }
        }

        // subscribers, in neuron insertion order then dendrite declaration order
        let mut subscribers: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
        for (neuron_idx, n) in neurons.iter().enumerate() {
            for (dendrite_idx, d) in n.dendrites.iter().enumerate() {
                subscribers
                    .entry(d.input_collateral_name.clone())
                    .or_default()
                    .push((neuron_idx, dendrite_idx));
            }
        }

        // edges: A -> B if A's axon outputs a collateral B subscribes to.
        // Node weight is the neuron index so the condensed graph (built
        // below) can hand back original neuron indices per SCC.
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(neurons.len(), 0);
        for idx in 0..neurons.len() {
            // Neurons are added in order with no removals, so add_node's
            // returned NodeIndex always equals NodeIndex::new(idx).
            graph.add_node(idx);
        }
        let mut seen_edges: HashSet<(usize, usize)> = HashSet::new();
        for (a_idx, a) in neurons.iter().enumerate() {
            for collateral_name in a.axon.collateral_names() {
                if let Some(subs) = subscribers.get(collateral_name) {
                    for &(b_idx, _dendrite_idx) in subs {
                        if seen_edges.insert((a_idx, b_idx)) {
                            graph.add_edge(NodeIndex::new(a_idx), NodeIndex::new(b_idx), ());
                        }
                    }
                }
            }
        }

        // condensation computes Tarjan SCCs internally and collapses each
        // one into a node carrying the original neuron indices it grouped.
        let condensed = condensation(graph, true);

        let scc_count = condensed.node_count();
        let mut scc_index = vec![0usize; neurons.len()];
        let mut scc_members = vec![Vec::new(); scc_count];
        for node in condensed.node_indices() {
            let scc_idx = node.index();
            for &neuron_idx in &condensed[node] {
                scc_index[neuron_idx] = scc_idx;
            }
            scc_members[scc_idx] = condensed[node].clone();
        }

        let scc_reachable = compute_scc_reachability(&condensed, scc_count);

        Ok(Self {
            neurons,
            name_to_index,
            subscribers,
            scc_index,
            scc_members,
            scc_reachable,
        })
    }

    pub fn neuron_index(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn neuron_by_index(&self, idx: usize) -> &Neuron {
        &self.neurons[idx]
    }

    pub fn neuron_by_name(&self, name: &str) -> Option<&Neuron> {
        self.neuron_index(name).map(|idx| &self.neurons[idx])
    }

    pub fn dendrite(&self, neuron_idx: usize, dendrite_idx: usize) -> &Dendrite {
        &self.neurons[neuron_idx].dendrites[dendrite_idx]
    }

    /// Subscribers for a collateral name, in neuron-insertion then
    /// dendrite-declaration order. Empty slice for unknown collaterals —
    /// that is not an error (§3 invariants).
    pub fn subscribers_for(&self, collateral_name: &str) -> &[(usize, usize)] {
        self.subscribers.get(collateral_name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn scc_index_of(&self, neuron_name: &str) -> Option<usize> {
        self.neuron_index(neuron_name).map(|idx| self.scc_index[idx])
    }

    pub fn scc_index_of_idx(&self, neuron_idx: usize) -> usize {
        self.scc_index[neuron_idx]
    }

    /// Names of every neuron in the same SCC as `neuron_name`, including
    /// itself.
    pub fn scc_set_of(&self, neuron_name: &str) -> Option<HashSet<String>> {
        let scc_idx = self.scc_index_of(neuron_name)?;
        Some(
            self.scc_members[scc_idx]
                .iter()
                .map(|&idx| self.neurons[idx].name.clone())
                .collect(),
        )
    }

    pub fn scc_members(&self, scc_idx: usize) -> &[usize] {
        &self.scc_members[scc_idx]
    }

    /// Reflexive set of SCC indices reachable from `scc_idx`.
    pub fn scc_reachable_from(&self, scc_idx: usize) -> &HashSet<usize> {
        &self.scc_reachable[scc_idx]
    }

    pub fn scc_count(&self) -> usize {
        self.scc_members.len()
    }

    /// Every SCC as a list of neuron names, in SCC-index order.
    pub fn strongly_connected_components(&self) -> Vec<Vec<String>> {
        self.scc_members
            .iter()
            .map(|members| members.iter().map(|&idx| self.neurons[idx].name.clone()).collect())
            .collect()
    }

    /// Public introspection variant of the guaranteed-done check (§6): given
    /// only a snapshot of active counts per SCC (no queue knowledge), is
    /// every SCC reachable from `neuron_name` idle?
    ///
    /// The scheduler's internal cleanup check (§4.6) is stricter: it also
    /// consults the live queue, which this snapshot-based API cannot see.
    pub fn can_neuron_be_guaranteed_done(&self, neuron_name: &str, active_counts_by_scc: &HashMap<usize, usize>) -> bool {
        let Some(scc_idx) = self.scc_index_of(neuron_name) else {
            return true;
        };
        self.scc_reachable_from(scc_idx)
            .iter()
            .all(|r| active_counts_by_scc.get(r).copied().unwrap_or(0) == 0)
    }

    pub fn len(&self) -> usize {
        self.neurons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neurons.is_empty()
    }
}

/// Build the reflexive reachable-SCC-set table from the already-condensed
/// DAG of SCCs by folding successor sets in reverse topological order
/// (§4.3 step 4). The condensed graph's own node indices are used directly
/// as SCC ids (this matches how `Network::build` assigns `scc_index`).
fn compute_scc_reachability(condensed: &DiGraph<Vec<usize>, ()>, scc_count: usize) -> Vec<HashSet<usize>> {
    if scc_count == 0 {
        return Vec::new();
    }

    let topo = toposort(condensed, None).expect("condensation output must be a DAG");

    let mut reachable: Vec<HashSet<usize>> = vec![HashSet::new(); scc_count];
    for &node in topo.iter().rev() {
        let scc_idx = node.index();
        let mut set = HashSet::new();
        set.insert(scc_idx);
        for succ in condensed.neighbors(node) {
            set.extend(reachable[succ.index()].iter().copied());
        }
        reachable[scc_idx] = set;
    }

    reachable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axon::Axon;
    use crate::neuron::neuron;
    use crate::reaction::{reaction, ReactionOutput};

    fn noop() -> std::sync::Arc<dyn crate::reaction::Reaction> {
        reaction(|_p, _a, _c| async { Ok(ReactionOutput::None) })
    }

    #[test]
    fn duplicate_neuron_names_are_a_construction_error() {
        let a = neuron("dup", Axon::new()).build();
        let b = neuron("dup", Axon::new()).build();
        let err = Network::build(vec![a, b]).unwrap_err();
        assert!(matches!(err, Error::DuplicateNeuron(name) if name == "dup"));
    }

    #[test]
    fn linear_chain_has_one_scc_per_neuron() {
        let n1 = neuron("n1", Axon::new().with_output("out", "c1")).bind("in", noop()).build();
        let n2 = neuron("n2", Axon::new().with_output("out", "c2")).bind("c1", noop()).build();
        let net = Network::build(vec![n1, n2]).unwrap();
        assert_eq!(net.scc_count(), 2);
        assert_ne!(net.scc_index_of("n1"), net.scc_index_of("n2"));
    }

    #[test]
    fn cycle_collapses_into_one_scc() {
        let n1 = neuron("n1", Axon::new().with_output("out", "to_n2")).bind("to_n1", noop()).build();
        let n2 = neuron("n2", Axon::new().with_output("out", "to_n1")).bind("to_n2", noop()).build();
        let net = Network::build(vec![n1, n2]).unwrap();
        assert_eq!(net.scc_count(), 1);
        assert_eq!(net.scc_index_of("n1"), net.scc_index_of("n2"));
        let members = net.scc_set_of("n1").unwrap();
        assert!(members.contains("n1") && members.contains("n2"));
    }

    #[test]
    fn reachability_is_reflexive_and_transitive() {
        let n1 = neuron("n1", Axon::new().with_output("out", "c1")).bind("in", noop()).build();
        let n2 = neuron("n2", Axon::new().with_output("out", "c2")).bind("c1", noop()).build();
        let n3 = neuron("n3", Axon::new()).bind("c2", noop()).build();
        let net = Network::build(vec![n1, n2, n3]).unwrap();

        let scc1 = net.scc_index_of("n1").unwrap();
        let scc2 = net.scc_index_of("n2").unwrap();
        let scc3 = net.scc_index_of("n3").unwrap();

        assert!(net.scc_reachable_from(scc1).contains(&scc1));
        assert!(net.scc_reachable_from(scc1).contains(&scc2));
        assert!(net.scc_reachable_from(scc1).contains(&scc3));
        assert!(!net.scc_reachable_from(scc3).contains(&scc1));
    }

    #[test]
    fn can_neuron_be_guaranteed_done_reads_only_the_snapshot() {
        let n1 = neuron("n1", Axon::new().with_output("out", "c1")).bind("in", noop()).build();
        let n2 = neuron("n2", Axon::new()).bind("c1", noop()).build();
        let net = Network::build(vec![n1, n2]).unwrap();
        let scc1 = net.scc_index_of("n1").unwrap();
        let scc2 = net.scc_index_of("n2").unwrap();

        let mut counts = HashMap::new();
        counts.insert(scc1, 0);
        counts.insert(scc2, 1);
        assert!(!net.can_neuron_be_guaranteed_done("n1", &counts));

        counts.insert(scc2, 0);
        assert!(net.can_neuron_be_guaranteed_done("n1", &counts));
    }
}
