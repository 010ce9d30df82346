//! Lazy enumeration of a parameter sweep.
//!
//! The sweep is the Cartesian product of every parameter's domain in
//! declaration order, with the leftmost parameter varying slowest (the order
//! nested loops would produce). Assignments are decoded from their index on
//! demand, so the sweep never materialises and can be restarted at will.

use crate::domain::error::{Result, SweepError};
use crate::domain::param::{Binding, ParameterAssignment, ParameterSpec};

/// A validated, restartable parameter sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Sweep {
    parameters: Vec<ParameterSpec>,
    radices: Vec<u64>,
    len: u64,
}

impl Sweep {
    /// Validate every domain and size the sweep.
    ///
    /// Fails with [`SweepError::InvalidDomain`] on bad bounds or when the
    /// total number of assignments does not fit in a `u64`.
    pub fn new(parameters: &[ParameterSpec]) -> Result<Self> {
        let mut radices = Vec::with_capacity(parameters.len());
        let mut len: u64 = 1;
        for param in parameters {
            let size = param.cardinality()?;
            len = len.checked_mul(size).ok_or_else(|| {
                SweepError::domain(&param.name, "sweep has too many assignments to enumerate")
            })?;
            radices.push(size);
        }
        Ok(Self {
            parameters: parameters.to_vec(),
            radices,
            len,
        })
    }

    /// Total number of assignments. Zero parameters yields one empty assignment.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Always `false`: every valid domain is non-empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Parameters in declaration order.
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    /// Assignment at `index`, or `None` past the end.
    pub fn get(&self, index: u64) -> Option<ParameterAssignment> {
        if index >= self.len {
            return None;
        }
        let mut digits = vec![0u64; self.parameters.len()];
        let mut rest = index;
        for (slot, radix) in digits.iter_mut().zip(&self.radices).rev() {
            *slot = rest % radix;
            rest /= radix;
        }
        let bindings = self
            .parameters
            .iter()
            .zip(digits)
            .map(|(param, digit)| Binding {
                name: param.name.clone(),
                value: param.domain.value_at(digit),
            })
            .collect();
        Some(ParameterAssignment { index, bindings })
    }

    /// Iterate from the first assignment.
    pub fn iter(&self) -> SweepIter<'_> {
        SweepIter {
            sweep: self,
            next: 0,
        }
    }
}

impl<'a> IntoIterator for &'a Sweep {
    type Item = ParameterAssignment;
    type IntoIter = SweepIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`Sweep`] in generation order.
#[derive(Debug, Clone)]
pub struct SweepIter<'a> {
    sweep: &'a Sweep,
    next: u64,
}

impl Iterator for SweepIter<'_> {
    type Item = ParameterAssignment;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.sweep.get(self.next)?;
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.sweep.len.saturating_sub(self.next);
        match usize::try_from(remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}
