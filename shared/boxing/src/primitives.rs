use serde::{Deserialize, Serialize};
use std::time::Duration;
use weft_core::{
    shard_view_at, BoxingError, Distribution, LocalBuffer, LocalKernel, Placement, RankId, Sbp,
    ShardView,
};
use weft_transport::{
    all_gather_concat, all_reduce_sum, axis_communicator, reduce_scatter_sum, TransportError,
};

/// One primitive transition along a single grid axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisOp {
    /// `B -> S(d)`: slice the replicated value locally, no communication.
    SliceLocal { dim: usize },
    /// `B -> P`: coordinate 0 keeps its value, everyone else zero-fills.
    ZeroNonRoot,
    /// `S(d) -> B`: all-gather along the axis, concatenating on `dim`.
    AllGather { dim: usize },
    /// `S(d) -> S(d')`: all-gather on `from_dim`, then slice on `to_dim`.
    Reshard { from_dim: usize, to_dim: usize },
    /// `S(d) -> P`: embed the local shard into zeros at its owning
    /// interval, no communication.
    SpreadPartial,
    /// `P -> B`: all-reduce with sum.
    AllReduce,
    /// `P -> S(d)`: reduce-scatter with sum along `dim`.
    ReduceScatter { dim: usize },
}

/// The primitive realizing `from -> to` on one axis, or `None` when the
/// pair needs no step.
pub fn axis_op(from: Sbp, to: Sbp) -> Option<AxisOp> {
    match (from, to) {
        (Sbp::Broadcast, Sbp::Broadcast) | (Sbp::Partial, Sbp::Partial) => None,
        (Sbp::Split(a), Sbp::Split(b)) if a == b => None,
        (Sbp::Broadcast, Sbp::Split(d)) => Some(AxisOp::SliceLocal { dim: d }),
        (Sbp::Broadcast, Sbp::Partial) => Some(AxisOp::ZeroNonRoot),
        (Sbp::Split(d), Sbp::Broadcast) => Some(AxisOp::AllGather { dim: d }),
        (Sbp::Split(a), Sbp::Split(b)) => Some(AxisOp::Reshard {
            from_dim: a,
            to_dim: b,
        }),
        (Sbp::Split(_), Sbp::Partial) => Some(AxisOp::SpreadPartial),
        (Sbp::Partial, Sbp::Broadcast) => Some(AxisOp::AllReduce),
        (Sbp::Partial, Sbp::Split(d)) => Some(AxisOp::ReduceScatter { dim: d }),
    }
}

/// Everything a primitive needs to run on one rank: the placement and axis
/// it works along, the distributions before and after the step, and the
/// global frame.
pub(crate) struct AxisContext<'a> {
    pub placement: &'a Placement,
    pub axis: usize,
    pub before: &'a Distribution,
    pub after: &'a Distribution,
    pub global_shape: &'a [usize],
    pub rank: RankId,
    pub kernel: &'a dyn LocalKernel,
    pub timeout: Duration,
}

impl AxisContext<'_> {
    pub(crate) fn run(&self, op: AxisOp, input: LocalBuffer) -> Result<LocalBuffer, BoxingError> {
        let grid = self.placement.grid();
        let coord = grid
            .coord_of(self.rank)
            .ok_or_else(|| BoxingError::rank_not_in_placement(self.rank, self.placement))?;
        // The frame this primitive works in: this axis replicated, every
        // other axis applied. Nested splits on the same tensor dimension
        // fall out of this choice.
        let base_dist = self.before.with_entry(self.axis, Sbp::Broadcast);
        let base = shard_view_at(self.global_shape, grid, &base_dist, &coord);

        match op {
            AxisOp::SliceLocal { dim } => {
                let target = shard_view_at(self.global_shape, grid, self.after, &coord);
                let (begin, end) = relative_interval(&target, &base, dim);
                Ok(input.slice_dim(dim, begin, end))
            }
            AxisOp::ZeroNonRoot => {
                if coord[self.axis] == 0 {
                    Ok(input)
                } else {
                    Ok(LocalBuffer::zeros(
                        input.shape(),
                        input.dtype(),
                        input.device(),
                    ))
                }
            }
            AxisOp::AllGather { dim } => {
                let comm = self.communicator()?;
                let shapes = self.member_shapes(self.before, &coord);
                all_gather_concat(&comm, &input, dim, &shapes).map_err(|e| self.transport(e))
            }
            AxisOp::Reshard { from_dim, to_dim } => {
                let comm = self.communicator()?;
                let shapes = self.member_shapes(self.before, &coord);
                let full =
                    all_gather_concat(&comm, &input, from_dim, &shapes).map_err(|e| self.transport(e))?;
                let target = shard_view_at(self.global_shape, grid, self.after, &coord);
                let (begin, end) = relative_interval(&target, &base, to_dim);
                Ok(full.slice_dim(to_dim, begin, end))
            }
            AxisOp::SpreadPartial => {
                let mine = shard_view_at(self.global_shape, grid, self.before, &coord);
                let origin: Vec<usize> = mine
                    .intervals
                    .iter()
                    .zip(base.intervals.iter())
                    .map(|((begin, _), (base_begin, _))| begin - base_begin)
                    .collect();
                input.embedded(&base.shape, &origin)
            }
            AxisOp::AllReduce => {
                let comm = self.communicator()?;
                all_reduce_sum(&comm, &input, self.kernel).map_err(|e| self.transport(e))
            }
            AxisOp::ReduceScatter { dim } => {
                let comm = self.communicator()?;
                let ranges: Vec<(usize, usize)> = (0..grid.dim(self.axis))
                    .map(|c| {
                        let mut peer = coord.clone();
                        peer[self.axis] = c;
                        let view = shard_view_at(self.global_shape, grid, self.after, &peer);
                        relative_interval(&view, &base, dim)
                    })
                    .collect();
                reduce_scatter_sum(&comm, &input, dim, &ranges, self.kernel)
                    .map_err(|e| self.transport(e))
            }
        }
    }

    fn communicator(&self) -> Result<weft_transport::Communicator, BoxingError> {
        axis_communicator(self.placement, self.axis, self.rank, self.timeout)
    }

    /// Current shard shape of every member along the axis, in coordinate
    /// order. Zero-sized shards still appear here so every member enters
    /// the collective.
    fn member_shapes(&self, dist: &Distribution, coord: &[usize]) -> Vec<Vec<usize>> {
        let grid = self.placement.grid();
        (0..grid.dim(self.axis))
            .map(|c| {
                let mut peer = coord.to_vec();
                peer[self.axis] = c;
                shard_view_at(self.global_shape, grid, dist, &peer).shape
            })
            .collect()
    }

    fn transport(&self, err: TransportError) -> BoxingError {
        BoxingError::from(err)
            .with_placement(self.placement)
            .with_axis(self.axis)
    }
}

fn relative_interval(target: &ShardView, base: &ShardView, dim: usize) -> (usize, usize) {
    let (begin, end) = target.intervals[dim];
    let (base_begin, _) = base.intervals[dim];
    (begin - base_begin, end - base_begin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_op_pairs() {
        assert_eq!(axis_op(Sbp::Broadcast, Sbp::Broadcast), None);
        assert_eq!(axis_op(Sbp::Partial, Sbp::Partial), None);
        assert_eq!(axis_op(Sbp::Split(1), Sbp::Split(1)), None);
    }

    #[test]
    fn test_pair_dispatch() {
        assert_eq!(
            axis_op(Sbp::Partial, Sbp::Split(1)),
            Some(AxisOp::ReduceScatter { dim: 1 })
        );
        assert_eq!(
            axis_op(Sbp::Split(0), Sbp::Split(1)),
            Some(AxisOp::Reshard {
                from_dim: 0,
                to_dim: 1
            })
        );
        assert_eq!(axis_op(Sbp::Split(0), Sbp::Partial), Some(AxisOp::SpreadPartial));
        assert_eq!(axis_op(Sbp::Partial, Sbp::Broadcast), Some(AxisOp::AllReduce));
    }
}
