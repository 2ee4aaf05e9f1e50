use crate::error::BoxingError;
use crate::grid::{Grid, RankId};
use crate::sbp::Distribution;

/// The contiguous range shard `index` owns when a dimension of length `len`
/// is split into `parts` balanced pieces. The first `len % parts` shards get
/// one extra element; every rank must use this rule and no other.
pub fn balanced_range(len: usize, parts: usize, index: usize) -> (usize, usize) {
    debug_assert!(index < parts);
    let base = len / parts;
    let rem = len % parts;
    let begin = index * base + index.min(rem);
    let end = (index + 1) * base + (index + 1).min(rem);
    (begin, end)
}

/// What one rank owns of a global tensor under a given distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardView {
    /// Local shard shape.
    pub shape: Vec<usize>,
    /// Absolute `(begin, end)` interval owned per tensor dimension.
    pub intervals: Vec<(usize, usize)>,
    /// Whether the local value is a partial contribution rather than the
    /// full value of its interval.
    pub partial: bool,
}

/// Computes the shard owned by the slot at `coord`. Split axes are applied
/// outer to inner, so a nested split on the same tensor dimension
/// sub-partitions the outer axis's shard.
pub fn shard_view_at(
    global_shape: &[usize],
    grid: &Grid,
    distribution: &Distribution,
    coord: &[usize],
) -> ShardView {
    debug_assert_eq!(distribution.ndim(), grid.ndim());
    debug_assert_eq!(coord.len(), grid.ndim());
    let mut intervals: Vec<(usize, usize)> = global_shape.iter().map(|&l| (0, l)).collect();
    for (axis, sbp) in distribution.iter().enumerate() {
        if let Some(d) = sbp.split_dim() {
            let (begin, end) = intervals[d];
            let (sub_begin, sub_end) = balanced_range(end - begin, grid.dim(axis), coord[axis]);
            intervals[d] = (begin + sub_begin, begin + sub_end);
        }
    }
    ShardView {
        shape: intervals.iter().map(|(b, e)| e - b).collect(),
        intervals,
        partial: distribution.has_partial(),
    }
}

/// Rank-addressed variant of [`shard_view_at`].
pub fn shard_view(
    global_shape: &[usize],
    grid: &Grid,
    distribution: &Distribution,
    rank: RankId,
) -> Result<ShardView, BoxingError> {
    let coord = grid.coord_of(rank).ok_or_else(|| {
        BoxingError::spec_invalid(format!("rank {rank} is not in grid {grid}"))
    })?;
    Ok(shard_view_at(global_shape, grid, distribution, &coord))
}
