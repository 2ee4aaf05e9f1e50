use crate::device::DeviceKind;
use crate::error::BoxingError;
use crate::grid::{Grid, RankId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A device kind plus the grid of ranks a tensor is spread over.
///
/// Two placements are equal iff device kind, rank order, and hierarchy all
/// match element-wise. Overlap and containment are plain rank-set relations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    device: DeviceKind,
    grid: Grid,
}

impl Placement {
    pub fn new(device: DeviceKind, grid: Grid) -> Self {
        Placement { device, grid }
    }

    /// Flat 1-D host placement, the most common shape in practice.
    pub fn host(ranks: Vec<RankId>) -> Result<Self, BoxingError> {
        Ok(Placement::new(DeviceKind::Host, Grid::new(ranks)?))
    }

    pub fn with_hierarchy(
        device: DeviceKind,
        ranks: Vec<RankId>,
        hierarchy: Vec<usize>,
    ) -> Result<Self, BoxingError> {
        Ok(Placement::new(device, Grid::with_hierarchy(ranks, hierarchy)?))
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn ranks(&self) -> &[RankId] {
        self.grid.ranks()
    }

    pub fn contains_rank(&self, rank: RankId) -> bool {
        self.grid.contains(rank)
    }

    pub fn same_rank_set(&self, other: &Placement) -> bool {
        self.rank_set() == other.rank_set()
    }

    pub fn is_disjoint_from(&self, other: &Placement) -> bool {
        self.rank_set().is_disjoint(&other.rank_set())
    }

    pub fn overlaps(&self, other: &Placement) -> bool {
        !self.is_disjoint_from(other)
    }

    /// True when every rank of `other` is also a rank of `self`.
    pub fn contains_all_of(&self, other: &Placement) -> bool {
        other.rank_set().is_subset(&self.rank_set())
    }

    /// Ranks present in both placements, in `self`'s coordinate order.
    pub fn intersection_ranks(&self, other: &Placement) -> Vec<RankId> {
        self.ranks()
            .iter()
            .copied()
            .filter(|&r| other.contains_rank(r))
            .collect()
    }

    fn rank_set(&self) -> HashSet<RankId> {
        self.ranks().iter().copied().collect()
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.device, self.grid)
    }
}
