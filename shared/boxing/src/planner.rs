use crate::config::BoxingConfig;
use crate::primitives::{axis_op, AxisOp};
use serde::{Deserialize, Serialize};
use tracing::debug;
use weft_core::{BoxingError, DeviceKind, Distribution, Placement, RankId, Sbp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanStep {
    /// A primitive on one grid axis of a single placement.
    Axis {
        placement: Placement,
        axis: usize,
        op: AxisOp,
        before: Distribution,
        after: Distribution,
    },
    /// Reinterpret the same rank set under a new placement without moving
    /// data between ranks. Legal only when the payload is replicated or
    /// only the device kind changes; local buffers are restaged to the new
    /// device.
    Rebind {
        placement: Placement,
        distribution: Distribution,
    },
    /// Paired point-to-point transfers between two placements. Ranks
    /// present on both sides keep their buffer; ranks only on the
    /// destination side receive from their paired source rank.
    Bridge {
        src_placement: Placement,
        src_distribution: Distribution,
        dst_placement: Placement,
        dst_distribution: Distribution,
        transfers: Vec<(RankId, RankId)>,
    },
}

/// A totally ordered sequence of steps; every rank derives and walks the
/// identical plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Chooses the step sequence connecting the two specifications. Pure
/// function of its arguments: no transport, no rank-local state.
pub fn plan(
    src_placement: &Placement,
    src_distribution: &Distribution,
    dst_placement: &Placement,
    dst_distribution: &Distribution,
    global_shape: &[usize],
    config: &BoxingConfig,
) -> Result<Plan, BoxingError> {
    src_distribution.validate_for(src_placement.grid(), global_shape)?;
    dst_distribution.validate_for(dst_placement.grid(), global_shape)?;
    for placement in [src_placement, dst_placement] {
        if config.cpu_only && placement.device() == DeviceKind::Accelerator {
            return Err(
                BoxingError::spec_invalid("accelerator placement in cpu-only mode")
                    .with_placement(placement),
            );
        }
        if placement.grid().ndim() > 2 {
            return Err(BoxingError::unsupported(format!(
                "grids deeper than 2 axes are not covered (got {} axes)",
                placement.grid().ndim()
            ))
            .with_placement(placement));
        }
    }
    // Known-broken destination in the source system; its semantics are not
    // pinned down, so refuse rather than guess.
    if dst_placement.grid().ndim() == 2
        && dst_distribution.entry(0).split_dim().is_some()
        && dst_distribution.entry(1) == Sbp::Broadcast
    {
        return Err(BoxingError::unimplemented(format!(
            "destination {dst_distribution} on a 2-axis grid"
        ))
        .with_placement(dst_placement));
    }

    let mut steps = Vec::new();
    if src_placement == dst_placement {
        same_placement_steps(src_placement, src_distribution, dst_distribution, &mut steps)?;
    } else if src_placement.ranks() == dst_placement.ranks()
        && src_placement.grid().hierarchy() == dst_placement.grid().hierarchy()
    {
        // Only the device kind differs; restage and redistribute in place.
        steps.push(PlanStep::Rebind {
            placement: dst_placement.clone(),
            distribution: src_distribution.clone(),
        });
        same_placement_steps(dst_placement, src_distribution, dst_distribution, &mut steps)?;
    } else if src_placement.same_rank_set(dst_placement) {
        // Same ranks under a different hierarchy or order: replicate,
        // reinterpret under the destination grid, redistribute.
        let src_b = Distribution::broadcast(src_placement.grid().ndim());
        let dst_b = Distribution::broadcast(dst_placement.grid().ndim());
        same_placement_steps(src_placement, src_distribution, &src_b, &mut steps)?;
        steps.push(PlanStep::Rebind {
            placement: dst_placement.clone(),
            distribution: dst_b.clone(),
        });
        same_placement_steps(dst_placement, &dst_b, dst_distribution, &mut steps)?;
    } else if src_placement.is_disjoint_from(dst_placement)
        && src_placement.grid().hierarchy() == dst_placement.grid().hierarchy()
    {
        // Aligned disjoint grids: build the destination layout on the
        // source grid and ship shard-for-shard between equal coordinates.
        // Shards and partial contributions cross the bridge unchanged.
        same_placement_steps(src_placement, src_distribution, dst_distribution, &mut steps)?;
        let transfers = src_placement
            .ranks()
            .iter()
            .copied()
            .zip(dst_placement.ranks().iter().copied())
            .collect();
        steps.push(PlanStep::Bridge {
            src_placement: src_placement.clone(),
            src_distribution: dst_distribution.clone(),
            dst_placement: dst_placement.clone(),
            dst_distribution: dst_distribution.clone(),
            transfers,
        });
    } else {
        // General route for containment, overlap, and unaligned disjoint
        // sets: replicate on the source (partial contributors outside the
        // destination join this reduction before dropping out), fan full
        // copies out to destination-only ranks, then redistribute.
        let src_b = Distribution::broadcast(src_placement.grid().ndim());
        let dst_b = Distribution::broadcast(dst_placement.grid().ndim());
        same_placement_steps(src_placement, src_distribution, &src_b, &mut steps)?;
        let dst_only: Vec<RankId> = dst_placement
            .ranks()
            .iter()
            .copied()
            .filter(|&r| !src_placement.contains_rank(r))
            .collect();
        let src_ranks = src_placement.ranks();
        let transfers = dst_only
            .iter()
            .enumerate()
            .map(|(i, &to)| (src_ranks[i % src_ranks.len()], to))
            .collect();
        steps.push(PlanStep::Bridge {
            src_placement: src_placement.clone(),
            src_distribution: src_b,
            dst_placement: dst_placement.clone(),
            dst_distribution: dst_b.clone(),
            transfers,
        });
        same_placement_steps(dst_placement, &dst_b, dst_distribution, &mut steps)?;
    }

    debug!(
        src_placement = %src_placement,
        src = %src_distribution,
        dst_placement = %dst_placement,
        dst = %dst_distribution,
        steps = steps.len(),
        "planned boxing route"
    );
    Ok(Plan { steps })
}

/// Axis-by-axis decomposition on one placement. 1-D grids take the direct
/// primitive. On 2-D grids the inner axis goes first, then the outer, then
/// the inner again; an inner split aliasing a tensor dimension the outer
/// move touches is lifted to broadcast before the outer primitive and
/// re-established afterwards. This keeps every emitted primitive's gather
/// and slice intervals contiguous, including nested splits of one tensor
/// dimension.
fn same_placement_steps(
    placement: &Placement,
    from: &Distribution,
    to: &Distribution,
    steps: &mut Vec<PlanStep>,
) -> Result<(), BoxingError> {
    if from == to {
        return Ok(());
    }
    let mut cur = from.clone();
    match placement.grid().ndim() {
        1 => {
            push_axis(steps, placement, 0, &mut cur, to.entry(0));
            Ok(())
        }
        2 => {
            let outer_change = cur.entry(0) != to.entry(0);
            let outer_dims: Vec<usize> = if outer_change {
                [cur.entry(0), to.entry(0)]
                    .iter()
                    .filter_map(Sbp::split_dim)
                    .collect()
            } else {
                Vec::new()
            };
            let inner_goal = to.entry(1);
            let inner_first = match (cur.entry(1), inner_goal) {
                (Sbp::Split(d), goal) if outer_change && outer_dims.contains(&d) && goal == cur.entry(1) => {
                    Sbp::Broadcast
                }
                (_, Sbp::Split(d)) if outer_change && outer_dims.contains(&d) => Sbp::Broadcast,
                (_, goal) => goal,
            };
            push_axis(steps, placement, 1, &mut cur, inner_first);
            push_axis(steps, placement, 0, &mut cur, to.entry(0));
            push_axis(steps, placement, 1, &mut cur, to.entry(1));
            Ok(())
        }
        n => Err(BoxingError::unsupported(format!(
            "grids deeper than 2 axes are not covered (got {n} axes)"
        ))
        .with_placement(placement)),
    }
}

fn push_axis(
    steps: &mut Vec<PlanStep>,
    placement: &Placement,
    axis: usize,
    cur: &mut Distribution,
    target: Sbp,
) {
    let after = cur.with_entry(axis, target);
    if let Some(op) = axis_op(cur.entry(axis), target) {
        steps.push(PlanStep::Axis {
            placement: placement.clone(),
            axis,
            op,
            before: cur.clone(),
            after: after.clone(),
        });
    }
    *cur = after;
}
