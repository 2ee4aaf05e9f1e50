use crate::error::BoxingError;
use crate::grid::Grid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a global tensor maps to local shards along one grid axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sbp {
    /// Every rank along the axis holds the identical full value.
    Broadcast,
    /// The tensor is split along its own dimension `d` into contiguous,
    /// balanced pieces indexed by the axis coordinate.
    Split(usize),
    /// Every rank holds a partial contribution; the global value is the
    /// element-wise sum across the axis.
    Partial,
}

impl Sbp {
    pub fn split_dim(&self) -> Option<usize> {
        match self {
            Sbp::Split(d) => Some(*d),
            _ => None,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Sbp::Broadcast)
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Sbp::Partial)
    }
}

impl fmt::Display for Sbp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sbp::Broadcast => write!(f, "B"),
            Sbp::Split(d) => write!(f, "S({d})"),
            Sbp::Partial => write!(f, "P"),
        }
    }
}

/// A frozen tuple of [`Sbp`] entries, one per grid axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Distribution(Vec<Sbp>);

impl Distribution {
    pub fn new(entries: Vec<Sbp>) -> Self {
        assert!(!entries.is_empty(), "a distribution needs at least one entry");
        Distribution(entries)
    }

    /// Fully replicated over an `ndim`-axis grid.
    pub fn broadcast(ndim: usize) -> Self {
        Distribution::new(vec![Sbp::Broadcast; ndim])
    }

    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    pub fn entry(&self, axis: usize) -> Sbp {
        self.0[axis]
    }

    pub fn entries(&self) -> &[Sbp] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sbp> {
        self.0.iter()
    }

    /// Copy of this distribution with one axis replaced.
    pub fn with_entry(&self, axis: usize, sbp: Sbp) -> Self {
        let mut entries = self.0.clone();
        entries[axis] = sbp;
        Distribution(entries)
    }

    pub fn touches_tensor_dim(&self, dim: usize) -> bool {
        self.0.iter().any(|s| s.split_dim() == Some(dim))
    }

    pub fn has_partial(&self) -> bool {
        self.0.iter().any(Sbp::is_partial)
    }

    pub fn is_all_broadcast(&self) -> bool {
        self.0.iter().all(Sbp::is_broadcast)
    }

    /// Number of grid axes that a transformation toward `target` must
    /// collectively reduce: those that are partial here and not in the
    /// target.
    pub fn pending_reductions(&self, target: &Distribution) -> usize {
        self.0
            .iter()
            .zip(target.0.iter())
            .filter(|(from, to)| from.is_partial() && !to.is_partial())
            .count()
    }

    /// Checks this distribution against a concrete grid and global shape.
    pub fn validate_for(&self, grid: &Grid, global_shape: &[usize]) -> Result<(), BoxingError> {
        if self.ndim() != grid.ndim() {
            return Err(BoxingError::spec_invalid(format!(
                "distribution {self} has {} entries for a {}-axis grid",
                self.ndim(),
                grid.ndim()
            )));
        }
        for sbp in &self.0 {
            if let Some(d) = sbp.split_dim() {
                if d >= global_shape.len() {
                    return Err(BoxingError::spec_invalid(format!(
                        "{sbp} refers to tensor dim {d} but the global shape is {global_shape:?}"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl From<Sbp> for Distribution {
    fn from(sbp: Sbp) -> Self {
        Distribution::new(vec![sbp])
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, sbp) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{sbp}")?;
        }
        write!(f, "]")
    }
}
