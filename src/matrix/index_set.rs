//! Ordered collections of indices.

use crate::error::BddcError;

/// An ordered collection of (local or global) indices.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexSet {
    indices: Vec<usize>,
}

impl IndexSet {
    /// Keep `indices` in the given order.
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices }
    }

    /// Sorted, without duplicates.
    pub fn sorted(mut indices: Vec<usize>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        Self { indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    pub fn contains(&self, i: usize) -> bool {
        self.indices.contains(&i)
    }

    /// Boolean mask of length `n`; fails if an index is out of range.
    pub fn to_mask(&self, n: usize) -> Result<Vec<bool>, BddcError> {
        let mut mask = vec![false; n];
        for &i in &self.indices {
            *mask.get_mut(i).ok_or_else(|| {
                BddcError::InvalidInput(format!("index {i} out of range for {n} dofs"))
            })? = true;
        }
        Ok(mask)
    }

    /// Positions `i` with `mask[i]`.
    pub fn from_mask(mask: &[bool]) -> Self {
        Self {
            indices: mask.iter().enumerate().filter(|&(_, &m)| m).map(|(i, _)| i).collect(),
        }
    }
}

impl From<Vec<usize>> for IndexSet {
    fn from(indices: Vec<usize>) -> Self {
        Self::new(indices)
    }
}

impl FromIterator<usize> for IndexSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_round_trip_and_range_check() {
        let is = IndexSet::sorted(vec![3, 1, 3]);
        assert_eq!(is.indices(), &[1, 3]);
        let mask = is.to_mask(4).unwrap();
        assert_eq!(IndexSet::from_mask(&mask), is);
        assert!(is.to_mask(3).is_err());
    }
}
