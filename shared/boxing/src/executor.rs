use crate::config::BoxingConfig;
use crate::planner::{Plan, PlanStep};
use crate::primitives::AxisContext;
use crate::tensor::ConsistentTensor;
use tracing::trace;
use weft_core::{
    shard_view, BoxingError, Distribution, LocalBuffer, LocalKernel, Placement, RankId,
};
use weft_transport::{bridge_communicator, recv_buffer, send_buffer};

/// Walks the plan on the calling rank, skipping steps whose placement does
/// not include it. Intermediate buffers are dropped on the first failure;
/// the error identifies the failing step.
pub(crate) fn execute(
    plan: &Plan,
    tensor: &ConsistentTensor,
    dst_placement: &Placement,
    dst_distribution: &Distribution,
    rank: RankId,
    kernel: &dyn LocalKernel,
    config: &BoxingConfig,
) -> Result<ConsistentTensor, BoxingError> {
    let mut local = tensor.local().cloned();
    for (index, step) in plan.steps.iter().enumerate() {
        match step {
            PlanStep::Axis {
                placement,
                axis,
                op,
                before,
                after,
            } => {
                if !placement.contains_rank(rank) {
                    continue;
                }
                trace!(step = index, axis, ?op, "running axis primitive");
                let input = take_local(&mut local, rank, index, placement)?;
                let ctx = AxisContext {
                    placement,
                    axis: *axis,
                    before,
                    after,
                    global_shape: tensor.global_shape(),
                    rank,
                    kernel,
                    timeout: config.transport_timeout,
                };
                local = Some(ctx.run(*op, input).map_err(|e| e.with_step(index))?);
            }
            PlanStep::Rebind { placement, .. } => {
                if placement.contains_rank(rank) {
                    trace!(step = index, placement = %placement, "rebinding");
                    let input = take_local(&mut local, rank, index, placement)?;
                    local = Some(input.to_device(placement.device()));
                } else {
                    local = None;
                }
            }
            PlanStep::Bridge {
                src_placement,
                dst_placement: bridge_dst,
                transfers,
                ..
            } => {
                run_bridge(
                    src_placement,
                    bridge_dst,
                    transfers,
                    rank,
                    &mut local,
                    config,
                    index,
                )?;
            }
        }
    }

    if dst_placement.contains_rank(rank) {
        let expected = shard_view(
            tensor.global_shape(),
            dst_placement.grid(),
            dst_distribution,
            rank,
        )?;
        match &local {
            Some(buffer) if buffer.shape() == expected.shape.as_slice() => {}
            Some(buffer) => {
                return Err(BoxingError::shape_mismatch(format!(
                    "boxing produced {:?} where the shard calculator expects {:?}",
                    buffer.shape(),
                    expected.shape
                ))
                .with_placement(dst_placement))
            }
            None => {
                return Err(BoxingError::shape_mismatch(
                    "boxing produced no local shard for a destination rank",
                )
                .with_placement(dst_placement))
            }
        }
    } else {
        local = None;
    }

    Ok(ConsistentTensor::new_unchecked(
        tensor.global_shape().to_vec(),
        tensor.dtype(),
        dst_placement.clone(),
        dst_distribution.clone(),
        local,
    ))
}

fn run_bridge(
    src_placement: &Placement,
    dst_placement: &Placement,
    transfers: &[(RankId, RankId)],
    rank: RankId,
    local: &mut Option<LocalBuffer>,
    config: &BoxingConfig,
    index: usize,
) -> Result<(), BoxingError> {
    let outgoing: Vec<RankId> = transfers
        .iter()
        .filter(|(from, _)| *from == rank)
        .map(|(_, to)| *to)
        .collect();
    let incoming: Vec<RankId> = transfers
        .iter()
        .filter(|(_, to)| *to == rank)
        .map(|(from, _)| *from)
        .collect();
    debug_assert!(incoming.len() <= 1);

    if !outgoing.is_empty() || !incoming.is_empty() {
        trace!(step = index, ?outgoing, ?incoming, "crossing bridge");
        let comm = bridge_communicator(src_placement, dst_placement, rank, config.transport_timeout)
            .map_err(|e| e.with_step(index))?;
        if !outgoing.is_empty() {
            let buffer = local
                .as_ref()
                .ok_or_else(|| missing_local(rank, index, src_placement))?;
            for to in outgoing {
                send_buffer(&comm, to, buffer)
                    .map_err(|e| bridge_error(e, src_placement, index))?;
            }
        }
        if let Some(&from) = incoming.first() {
            *local = Some(
                recv_buffer(&comm, from, dst_placement.device())
                    .map_err(|e| bridge_error(e, src_placement, index))?,
            );
            return Ok(());
        }
    }

    if dst_placement.contains_rank(rank) {
        let buffer = local
            .take()
            .ok_or_else(|| missing_local(rank, index, src_placement))?;
        *local = Some(buffer.to_device(dst_placement.device()));
    } else {
        *local = None;
    }
    Ok(())
}

fn take_local(
    local: &mut Option<LocalBuffer>,
    rank: RankId,
    index: usize,
    placement: &Placement,
) -> Result<LocalBuffer, BoxingError> {
    local
        .take()
        .ok_or_else(|| missing_local(rank, index, placement))
}

fn missing_local(rank: RankId, index: usize, placement: &Placement) -> BoxingError {
    BoxingError::shape_mismatch(format!("rank {rank} has no local buffer"))
        .with_placement(placement)
        .with_step(index)
}

fn bridge_error(
    err: weft_transport::TransportError,
    placement: &Placement,
    index: usize,
) -> BoxingError {
    BoxingError::from(err)
        .with_placement(placement)
        .with_step(index)
}
