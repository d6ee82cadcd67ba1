// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Sparse boolean matrices: the circuit encoding of relational expressions.

use itertools::Itertools;
use std::collections::BTreeMap;

use relational::universe::{Tuple, TupleSet};

use crate::circuit::Bool;

/// For every tuple that may belong to an expression, the circuit deciding
/// whether it does. Tuples without an entry are not in the expression.
#[derive(Debug, Clone)]
pub struct Matrix {
    arity: usize,
    cells: BTreeMap<Tuple, Bool>,
}

impl Matrix {
    /// The empty matrix.
    pub fn empty(arity: usize) -> Self {
        Self {
            arity,
            cells: BTreeMap::new(),
        }
    }

    /// The matrix of a constant set of tuples.
    pub fn constant(ts: &TupleSet) -> Self {
        Self {
            arity: ts.arity(),
            cells: ts.iter().map(|t| (t.clone(), Bool::Const(true))).collect(),
        }
    }

    /// The arity of the expression.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Set the circuit of a tuple; false circuits are not stored.
    pub fn insert(&mut self, tuple: Tuple, b: Bool) {
        if b.constant() == Some(false) {
            self.cells.remove(&tuple);
        } else {
            self.cells.insert(tuple, b);
        }
    }

    /// The circuit deciding membership of a tuple.
    pub fn get(&self, tuple: &[usize]) -> Bool {
        self.cells.get(tuple).cloned().unwrap_or(Bool::Const(false))
    }

    /// Tuples that may belong to the expression, with their circuits.
    pub fn iter(&self) -> impl Iterator<Item = (&Tuple, &Bool)> {
        self.cells.iter()
    }

    fn from_cells<I>(arity: usize, cells: I) -> Self
    where
        I: IntoIterator<Item = (Tuple, Bool)>,
    {
        let mut m = Self::empty(arity);
        for (t, b) in cells {
            m.insert(t, b);
        }
        m
    }

    /// Union
    pub fn union(&self, other: &Matrix) -> Matrix {
        let keys = self.cells.keys().merge(other.cells.keys()).dedup();
        Self::from_cells(
            self.arity,
            keys.map(|t| (t.clone(), Bool::or([self.get(t), other.get(t)]))),
        )
    }

    /// Intersection
    pub fn intersection(&self, other: &Matrix) -> Matrix {
        Self::from_cells(
            self.arity,
            self.cells
                .iter()
                .filter(|(t, _)| other.cells.contains_key(*t))
                .map(|(t, b)| (t.clone(), Bool::and([b.clone(), other.get(t)]))),
        )
    }

    /// Difference
    pub fn difference(&self, other: &Matrix) -> Matrix {
        Self::from_cells(
            self.arity,
            self.cells
                .iter()
                .map(|(t, b)| (t.clone(), Bool::and([b.clone(), other.get(t).not()]))),
        )
    }

    /// Relational override: a tuple of `self` survives unless `other` has
    /// some tuple with the same first atom.
    pub fn override_with(&self, other: &Matrix) -> Matrix {
        let mut keys: BTreeMap<usize, Vec<Bool>> = BTreeMap::new();
        for (t, b) in &other.cells {
            keys.entry(t[0]).or_default().push(b.clone());
        }
        let keys: BTreeMap<usize, Bool> = keys.into_iter().map(|(k, bs)| (k, Bool::or(bs))).collect();
        let kept = self.cells.iter().map(|(t, b)| {
            let overridden = keys.get(&t[0]).cloned().unwrap_or(Bool::Const(false));
            (t.clone(), Bool::and([b.clone(), overridden.not()]))
        });
        Self::from_cells(self.arity, kept).union(other)
    }

    /// Join on the last column of `self` and the first column of `other`.
    pub fn join(&self, other: &Matrix) -> Matrix {
        let mut by_first: BTreeMap<usize, Vec<(&Tuple, &Bool)>> = BTreeMap::new();
        for (t, b) in &other.cells {
            by_first.entry(t[0]).or_default().push((t, b));
        }
        let mut paths: BTreeMap<Tuple, Vec<Bool>> = BTreeMap::new();
        for (a, ba) in &self.cells {
            let Some(bs) = by_first.get(&a[a.len() - 1]) else {
                continue;
            };
            for (b, bb) in bs {
                let key: Tuple = a[..a.len() - 1].iter().chain(&b[1..]).copied().collect();
                paths
                    .entry(key)
                    .or_default()
                    .push(Bool::and([ba.clone(), (*bb).clone()]));
            }
        }
        Self::from_cells(
            self.arity + other.arity - 2,
            paths.into_iter().map(|(t, bs)| (t, Bool::or(bs))),
        )
    }

    /// Cartesian product
    pub fn product(&self, other: &Matrix) -> Matrix {
        Self::from_cells(
            self.arity + other.arity,
            self.cells
                .iter()
                .cartesian_product(other.cells.iter())
                .map(|((a, ba), (b, bb))| {
                    let t = a.iter().chain(b).copied().collect();
                    (t, Bool::and([ba.clone(), bb.clone()]))
                }),
        )
    }

    /// Transpose of a binary matrix
    pub fn transpose(&self) -> Matrix {
        Self::from_cells(
            2,
            self.cells
                .iter()
                .map(|(t, b)| (vec![t[1], t[0]], b.clone())),
        )
    }

    /// Transitive closure of a binary matrix over a universe of `size`
    /// atoms, by iterative squaring.
    pub fn closure(&self, size: usize) -> Matrix {
        let mut result = self.clone();
        let mut covered = 1;
        while covered < size {
            let next = result.union(&result.join(&result));
            // no new tuples and no new circuits: nothing left to add
            if next.cells.len() == result.cells.len()
                && next.cells.values().all(|b| b.constant() == Some(true))
            {
                return next;
            }
            result = next;
            covered *= 2;
        }
        result
    }

    /// If-then-else, cell by cell.
    pub fn ite(cond: &Bool, then: &Matrix, else_: &Matrix) -> Matrix {
        match cond.constant() {
            Some(true) => then.clone(),
            Some(false) => else_.clone(),
            None => {
                let keys = then.cells.keys().merge(else_.cells.keys()).dedup();
                Self::from_cells(
                    then.arity,
                    keys.map(|t| (t.clone(), Bool::ite(cond, &then.get(t), &else_.get(t)))),
                )
            }
        }
    }

    /// The expression is non-empty.
    pub fn some(&self) -> Bool {
        Bool::or(self.cells.values().cloned())
    }

    /// The expression is empty.
    pub fn no(&self) -> Bool {
        self.some().not()
    }

    /// The expression has at most one tuple.
    pub fn lone(&self) -> Bool {
        // seen: one of the cells so far is true
        let mut seen = Bool::Const(false);
        let mut conflicts = vec![];
        for b in self.cells.values() {
            conflicts.push(Bool::and([seen.clone(), b.clone()]));
            seen = Bool::or([seen, b.clone()]);
        }
        Bool::or(conflicts).not()
    }

    /// The expression has exactly one tuple.
    pub fn one(&self) -> Bool {
        Bool::and([self.some(), self.lone()])
    }

    /// Every tuple of `self` is in `other`.
    pub fn subset(&self, other: &Matrix) -> Bool {
        Bool::and(
            self.cells
                .iter()
                .map(|(t, b)| Bool::implies(b, &other.get(t))),
        )
    }

    /// Both expressions have the same tuples.
    pub fn equals(&self, other: &Matrix) -> Bool {
        Bool::and([self.subset(other), other.subset(self)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sat::{CadicalSolver, Interrupt, SatSolver};
    use crate::circuit::Tseytin;

    fn chain() -> TupleSet {
        TupleSet::from_tuples(2, [vec![0, 1], vec![1, 2], vec![2, 3]])
    }

    #[test]
    fn test_constant_operations_fold() {
        let next = Matrix::constant(&chain());
        let closure = next.closure(4);
        let tuples: Vec<&Tuple> = closure.iter().map(|(t, _)| t).collect();
        assert_eq!(tuples.len(), 6);
        assert!(closure.iter().all(|(_, b)| b.constant() == Some(true)));
        assert_eq!(next.subset(&closure).constant(), Some(true));
        assert_eq!(closure.subset(&next).constant(), Some(false));
        assert_eq!(next.transpose().join(&next).iter().count(), 3);
    }

    #[test]
    fn test_multiplicities() {
        // cells a, b, c over variables 1, 2, 3
        let m = Matrix::from_cells(1, (0..3).map(|i| (vec![i], Bool::var(i as i32 + 1))));
        let mut solver = CadicalSolver::new(Interrupt::new());
        let mut tseytin = Tseytin::new(3);
        tseytin.assert(&m.one(), &mut solver);
        assert_eq!(solver.solve(&[]), Ok(true));
        let count = (1..=3).filter(|&v| solver.value(v)).count();
        assert_eq!(count, 1);
        assert_eq!(solver.solve(&[1, 2]), Ok(false));
        assert_eq!(Matrix::empty(1).lone().constant(), Some(true));
        assert_eq!(Matrix::empty(1).some().constant(), Some(false));
    }

    #[test]
    fn test_override() {
        let r = Matrix::constant(&TupleSet::from_tuples(2, [vec![0, 1], vec![1, 1]]));
        let s = Matrix::from_cells(2, [(vec![0, 2], Bool::var(1))]);
        let o = r.override_with(&s);
        // (0, 1) survives only if s is empty
        assert!(matches!(o.get(&[0, 1]), Bool::Lit(-1)));
        assert_eq!(o.get(&[1, 1]).constant(), Some(true));
        assert!(matches!(o.get(&[0, 2]), Bool::Lit(1)));
    }
}
