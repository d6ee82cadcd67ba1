// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Instances (values for relations) and lasso-shaped traces of instances.

use serde::{ser::SerializeMap, ser::SerializeStruct, Serialize, Serializer};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;

use crate::{
    syntax::Relation,
    universe::{TupleSet, Universe},
};

/// A value for each of a set of relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    universe: Arc<Universe>,
    relations: BTreeMap<Relation, TupleSet>,
}

impl Instance {
    /// An instance with no relations.
    pub fn new(universe: Arc<Universe>) -> Self {
        Self {
            universe,
            relations: BTreeMap::new(),
        }
    }

    /// The universe of the instance.
    pub fn universe(&self) -> &Arc<Universe> {
        &self.universe
    }

    /// Set the value of a relation.
    pub fn add(&mut self, relation: Relation, tuples: TupleSet) {
        self.relations.insert(relation, tuples);
    }

    /// The value of a relation, if the instance has one.
    pub fn tuples(&self, relation: &Relation) -> Option<&TupleSet> {
        self.relations.get(relation)
    }

    /// Whether `relation` contains `tuple` in this instance.
    pub fn contains(&self, relation: &Relation, tuple: &[usize]) -> bool {
        self.relations
            .get(relation)
            .map_or(false, |ts| ts.contains(tuple))
    }

    /// The relations that have a value.
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.keys()
    }

    /// Every relation with its value.
    pub fn iter(&self) -> impl Iterator<Item = (&Relation, &TupleSet)> {
        self.relations.iter()
    }

    /// The same instance restricted to relations satisfying `keep`.
    pub fn restrict<F>(&self, keep: F) -> Instance
    where
        F: Fn(&Relation) -> bool,
    {
        Instance {
            universe: self.universe.clone(),
            relations: self
                .relations
                .iter()
                .filter(|(r, _)| keep(r))
                .map(|(r, ts)| (r.clone(), ts.clone()))
                .collect(),
        }
    }
}

impl Serialize for Instance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.relations.len()))?;
        for (r, ts) in &self.relations {
            let tuples: Vec<Vec<&str>> = ts.iter().map(|t| self.universe.tuple_names(t)).collect();
            map.serialize_entry(&r.name, &tuples)?;
        }
        map.end()
    }
}

/// An error in constructing a trace
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstanceError {
    /// A trace needs at least one state
    #[error("a trace needs at least one state")]
    Empty,
    /// The loop has to go back to an existing state
    #[error("loop state {loop_state} is outside a trace of length {length}")]
    LoopOutOfRange {
        /// The requested loop state
        loop_state: usize,
        /// The number of states
        length: usize,
    },
}

/// An infinite, ultimately periodic trace of instances, represented as a
/// lasso: a finite prefix of states whose last state is followed by the
/// state at `loop_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalInstance {
    states: Vec<Instance>,
    loop_state: usize,
}

impl TemporalInstance {
    /// Build a lasso from its states and loop-back index.
    pub fn new(states: Vec<Instance>, loop_state: usize) -> Result<Self, InstanceError> {
        if states.is_empty() {
            return Err(InstanceError::Empty);
        }
        if loop_state >= states.len() {
            return Err(InstanceError::LoopOutOfRange {
                loop_state,
                length: states.len(),
            });
        }
        Ok(Self { states, loop_state })
    }

    /// The trace that repeats a single instance forever.
    pub fn constant(instance: Instance) -> Self {
        Self {
            states: vec![instance],
            loop_state: 0,
        }
    }

    /// The universe of the trace.
    pub fn universe(&self) -> &Arc<Universe> {
        self.states[0].universe()
    }

    /// The number of states in the lasso encoding.
    pub fn prefix_length(&self) -> usize {
        self.states.len()
    }

    /// The state the last state loops back to.
    pub fn loop_state(&self) -> usize {
        self.loop_state
    }

    /// Length of the periodic part.
    pub fn period(&self) -> usize {
        self.states.len() - self.loop_state
    }

    /// The states of the lasso encoding.
    pub fn states(&self) -> &[Instance] {
        &self.states
    }

    /// The index in the encoding of the state at an arbitrary position of
    /// the infinite trace.
    pub fn position(&self, i: usize) -> usize {
        if i < self.states.len() {
            i
        } else {
            self.loop_state + (i - self.loop_state) % self.period()
        }
    }

    /// The state at an arbitrary position of the infinite trace.
    pub fn state(&self, i: usize) -> &Instance {
        &self.states[self.position(i)]
    }

    fn same_state(&self, i: usize, j: usize) -> bool {
        let (i, j) = (self.position(i), self.position(j));
        i == j || self.states[i] == self.states[j]
    }

    // Whether a lasso of `length` states looping back to `loop_state`
    // encodes this same infinite trace.
    fn encodes(&self, length: usize, loop_state: usize) -> bool {
        (0..self.states.len() + self.period())
            .all(|k| self.same_state(length + k, loop_state + k))
    }

    /// Every loop-back index that encodes the same infinite trace with the
    /// current prefix length (including [`TemporalInstance::loop_state`]).
    pub fn alternative_loops(&self) -> Vec<usize> {
        (0..self.states.len())
            .filter(|&l| self.encodes(self.states.len(), l))
            .collect()
    }

    /// All lasso encodings of this infinite trace with exactly `length`
    /// states, one per admissible loop-back index. Empty if the trace cannot
    /// be encoded in `length` states.
    pub fn unroll(&self, length: usize) -> Vec<TemporalInstance> {
        if length == 0 {
            return vec![];
        }
        let states: Vec<Instance> = (0..length).map(|i| self.state(i).clone()).collect();
        (0..length)
            .filter(|&l| self.encodes(length, l))
            .map(|l| TemporalInstance {
                states: states.clone(),
                loop_state: l,
            })
            .collect()
    }

    /// The loop-back indices of all encodings with exactly `length` states.
    pub fn loops_at(&self, length: usize) -> Vec<usize> {
        (0..length).filter(|&l| self.encodes(length, l)).collect()
    }

    /// The shortest encoding of this trace (with the earliest loop among
    /// the shortest ones).
    pub fn canonize(&self) -> TemporalInstance {
        (1..=self.states.len())
            .find_map(|length| self.unroll(length).into_iter().next())
            .unwrap_or_else(|| self.clone())
    }

    /// The same trace restricted to relations satisfying `keep`.
    pub fn strip<F>(&self, keep: F) -> TemporalInstance
    where
        F: Fn(&Relation) -> bool,
    {
        TemporalInstance {
            states: self.states.iter().map(|s| s.restrict(&keep)).collect(),
            loop_state: self.loop_state,
        }
    }
}

impl Serialize for TemporalInstance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("TemporalInstance", 2)?;
        s.serialize_field("states", &self.states)?;
        s.serialize_field("loop", &self.loop_state)?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(values: &[&[usize]], loop_state: usize) -> TemporalInstance {
        let u = Arc::new(Universe::new(["A0", "A1"]));
        let p = Relation::variable("p", 1);
        let states = values
            .iter()
            .map(|v| {
                let mut i = Instance::new(u.clone());
                i.add(p.clone(), TupleSet::from_tuples(1, v.iter().map(|&a| vec![a])));
                i
            })
            .collect();
        TemporalInstance::new(states, loop_state).unwrap()
    }

    #[test]
    fn test_positions() {
        let t = trace(&[&[], &[0], &[1]], 1);
        assert_eq!(t.position(3), 1);
        assert_eq!(t.position(4), 2);
        assert_eq!(t.state(5), t.state(1));
    }

    #[test]
    fn test_alternative_loops() {
        // p: {} {0} {0} looping to 1 is also {} {0} {0} looping to 2
        let t = trace(&[&[], &[0], &[0]], 1);
        assert_eq!(t.alternative_loops(), vec![1, 2]);
        let t = trace(&[&[], &[0], &[1]], 1);
        assert_eq!(t.alternative_loops(), vec![1]);
    }

    #[test]
    fn test_unroll_and_canonize() {
        let t = trace(&[&[], &[0], &[1]], 1);
        let unrolled = t.unroll(5);
        assert_eq!(t.loops_at(5), vec![1, 3]);
        assert_eq!(unrolled.len(), 2);
        assert_eq!(unrolled[1].loop_state(), 3);
        assert_eq!(unrolled[0].state(4), t.state(2));
        assert!(t.unroll(2).is_empty());
        assert_eq!(unrolled[0].canonize(), t);

        let constant = trace(&[&[0], &[0], &[0]], 2);
        assert_eq!(constant.canonize().prefix_length(), 1);
        assert_eq!(constant.unroll(2).len(), 2);
    }

    #[test]
    fn test_new_rejects_bad_loop() {
        let u = Arc::new(Universe::new(["A0"]));
        assert_eq!(
            TemporalInstance::new(vec![Instance::new(u)], 1),
            Err(InstanceError::LoopOutOfRange {
                loop_state: 1,
                length: 1
            })
        );
        assert_eq!(TemporalInstance::new(vec![], 0), Err(InstanceError::Empty));
    }
}
