// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Universes of atoms and sets of tuples over them.

use itertools::Itertools;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// An atom is identified by its index in the [`Universe`].
pub type Atom = usize;

/// A tuple of atoms. The arity of a tuple is its length.
pub type Tuple = Vec<Atom>;

/// A finite, ordered collection of named atoms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Universe {
    atoms: Vec<String>,
}

impl Universe {
    /// Create a universe from a list of atom names. Names are expected to be
    /// distinct; the parser checks this for problem files.
    pub fn new<I>(atoms: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            atoms: atoms.into_iter().map(|a| a.into()).collect(),
        }
    }

    /// Number of atoms.
    pub fn size(&self) -> usize {
        self.atoms.len()
    }

    /// The name of an atom.
    pub fn atom(&self, atom: Atom) -> &str {
        &self.atoms[atom]
    }

    /// All atom names, in order.
    pub fn atoms(&self) -> &[String] {
        &self.atoms
    }

    /// Look up an atom by name.
    pub fn index_of(&self, name: &str) -> Option<Atom> {
        self.atoms.iter().position(|a| a == name)
    }

    /// A universe with additional atoms appended after the existing ones, so
    /// that every tuple over `self` keeps its meaning.
    pub fn extend<I>(&self, extra: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut atoms = self.atoms.clone();
        atoms.extend(extra.into_iter().map(|a| a.into()));
        Self { atoms }
    }

    /// Every tuple of the given arity.
    pub fn all(&self, arity: usize) -> TupleSet {
        if arity == 0 {
            return TupleSet::singleton(vec![]);
        }
        TupleSet::from_tuples(
            arity,
            (0..arity)
                .map(|_| 0..self.size())
                .multi_cartesian_product(),
        )
    }

    /// The identity relation over the universe.
    pub fn iden(&self) -> TupleSet {
        TupleSet::from_tuples(2, (0..self.size()).map(|a| vec![a, a]))
    }

    /// Render a tuple using atom names.
    pub fn tuple_names(&self, tuple: &[Atom]) -> Vec<&str> {
        tuple.iter().map(|&a| self.atom(a)).collect()
    }
}

/// A set of tuples of a fixed arity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TupleSet {
    arity: usize,
    tuples: BTreeSet<Tuple>,
}

impl TupleSet {
    /// The empty set of the given arity.
    pub fn empty(arity: usize) -> Self {
        Self {
            arity,
            tuples: BTreeSet::new(),
        }
    }

    /// A set with a single tuple.
    pub fn singleton(tuple: Tuple) -> Self {
        Self {
            arity: tuple.len(),
            tuples: BTreeSet::from([tuple]),
        }
    }

    /// Build a tuple set from tuples that all have the given arity.
    pub fn from_tuples<I>(arity: usize, tuples: I) -> Self
    where
        I: IntoIterator<Item = Tuple>,
    {
        let tuples: BTreeSet<Tuple> = tuples.into_iter().collect();
        debug_assert!(tuples.iter().all(|t| t.len() == arity));
        Self { arity, tuples }
    }

    /// The arity of every tuple in the set.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Number of tuples.
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// Whether the set has no tuples.
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Membership test.
    pub fn contains(&self, tuple: &[Atom]) -> bool {
        self.tuples.contains(tuple)
    }

    /// Iterate over the tuples in lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter()
    }

    /// Add a tuple; returns false if it was already present.
    pub fn insert(&mut self, tuple: Tuple) -> bool {
        debug_assert_eq!(tuple.len(), self.arity);
        self.tuples.insert(tuple)
    }

    /// Subset test.
    pub fn is_subset(&self, other: &TupleSet) -> bool {
        self.tuples.is_subset(&other.tuples)
    }

    /// Whether every atom mentioned is below `size`.
    pub fn within(&self, size: usize) -> bool {
        self.tuples.iter().flatten().all(|&a| a < size)
    }

    /// Set union.
    pub fn union(&self, other: &TupleSet) -> TupleSet {
        Self::from_tuples(self.arity, self.tuples.union(&other.tuples).cloned())
    }

    /// Set intersection.
    pub fn intersection(&self, other: &TupleSet) -> TupleSet {
        Self::from_tuples(
            self.arity,
            self.tuples.intersection(&other.tuples).cloned(),
        )
    }

    /// Set difference.
    pub fn difference(&self, other: &TupleSet) -> TupleSet {
        Self::from_tuples(self.arity, self.tuples.difference(&other.tuples).cloned())
    }

    /// Relational override: tuples of `other`, plus tuples of `self` whose
    /// first atom does not start any tuple of `other`.
    pub fn override_with(&self, other: &TupleSet) -> TupleSet {
        let keys: BTreeSet<Atom> = other.tuples.iter().map(|t| t[0]).collect();
        Self::from_tuples(
            self.arity,
            self.tuples
                .iter()
                .filter(|t| !keys.contains(&t[0]))
                .chain(other.tuples.iter())
                .cloned(),
        )
    }

    /// Cartesian product.
    pub fn product(&self, other: &TupleSet) -> TupleSet {
        Self::from_tuples(
            self.arity + other.arity,
            self.tuples
                .iter()
                .cartesian_product(other.tuples.iter())
                .map(|(a, b)| a.iter().chain(b).copied().collect()),
        )
    }

    /// Relational join on the last column of `self` and the first column of
    /// `other`.
    pub fn join(&self, other: &TupleSet) -> TupleSet {
        let mut by_first: BTreeMap<Atom, Vec<&Tuple>> = BTreeMap::new();
        for t in &other.tuples {
            by_first.entry(t[0]).or_default().push(t);
        }
        let mut tuples = BTreeSet::new();
        for a in &self.tuples {
            if let Some(bs) = by_first.get(&a[a.len() - 1]) {
                for b in bs {
                    tuples.insert(a[..a.len() - 1].iter().chain(&b[1..]).copied().collect());
                }
            }
        }
        Self {
            arity: self.arity + other.arity - 2,
            tuples,
        }
    }

    /// Transpose of a binary relation.
    pub fn transpose(&self) -> TupleSet {
        Self::from_tuples(2, self.tuples.iter().map(|t| vec![t[1], t[0]]))
    }

    /// Transitive closure of a binary relation.
    pub fn closure(&self) -> TupleSet {
        let mut result = self.clone();
        loop {
            let next = result.union(&result.join(self));
            if next.len() == result.len() {
                return result;
            }
            result = next;
        }
    }
}

impl<'a> IntoIterator for &'a TupleSet {
    type Item = &'a Tuple;
    type IntoIter = std::collections::btree_set::Iter<'a, Tuple>;

    fn into_iter(self) -> Self::IntoIter {
        self.tuples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(arity: usize, ts: &[&[Atom]]) -> TupleSet {
        TupleSet::from_tuples(arity, ts.iter().map(|t| t.to_vec()))
    }

    #[test]
    fn test_join_and_closure() {
        let next = set(2, &[&[0, 1], &[1, 2]]);
        assert_eq!(next.join(&next), set(2, &[&[0, 2]]));
        assert_eq!(next.closure(), set(2, &[&[0, 1], &[0, 2], &[1, 2]]));
        assert_eq!(set(1, &[&[0]]).join(&next), set(1, &[&[1]]));
    }

    #[test]
    fn test_override_and_product() {
        let r = set(2, &[&[0, 1], &[1, 1]]);
        let s = set(2, &[&[0, 2]]);
        assert_eq!(r.override_with(&s), set(2, &[&[0, 2], &[1, 1]]));
        assert_eq!(set(1, &[&[0]]).product(&set(1, &[&[1], &[2]])).len(), 2);
    }

    #[test]
    fn test_universe_all() {
        let u = Universe::new(["A", "B", "C"]);
        assert_eq!(u.all(1).len(), 3);
        assert_eq!(u.all(2).len(), 9);
        assert_eq!(u.all(0).len(), 1);
        assert_eq!(u.iden().len(), 3);
        assert_eq!(u.extend(["T0"]).index_of("T0"), Some(3));
    }
}
