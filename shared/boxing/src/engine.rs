use crate::config::BoxingConfig;
use crate::executor::execute;
use crate::planner::plan;
use crate::tensor::ConsistentTensor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use weft_core::{
    shard_view, shard_view_at, BoxingError, DType, DeviceKind, Distribution, HostKernel,
    LocalBuffer, LocalKernel, Placement, RankId,
};
use weft_transport::{axis_communicator, broadcast_buffer, communicator};

/// Per-rank entry point into eager boxing. Every rank of the process group
/// constructs its own engine and issues the same calls in the same order;
/// the engine itself holds no mutable state.
pub struct BoxingEngine {
    rank: RankId,
    config: BoxingConfig,
    kernel: Arc<dyn LocalKernel>,
}

#[derive(Serialize, Deserialize)]
struct LiftMeta {
    shape: Vec<usize>,
    dtype: DType,
}

impl BoxingEngine {
    pub fn new(rank: RankId) -> Self {
        Self::with_config(rank, BoxingConfig::default())
    }

    pub fn with_config(rank: RankId, config: BoxingConfig) -> Self {
        BoxingEngine {
            rank,
            config,
            kernel: Arc::new(HostKernel),
        }
    }

    pub fn with_kernel(mut self, kernel: Arc<dyn LocalKernel>) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn rank(&self) -> RankId {
        self.rank
    }

    pub fn config(&self) -> &BoxingConfig {
        &self.config
    }

    /// Wraps an existing local shard into a consistent tensor. A resident
    /// rank must pass exactly the shard the calculator prescribes; a
    /// non-resident rank must pass `None`.
    pub fn make_consistent(
        &self,
        local: Option<LocalBuffer>,
        global_shape: Vec<usize>,
        dtype: DType,
        placement: Placement,
        distribution: Distribution,
    ) -> Result<ConsistentTensor, BoxingError> {
        distribution.validate_for(placement.grid(), &global_shape)?;
        self.check_device(&placement)?;
        let local = if placement.contains_rank(self.rank) {
            let buffer = local.ok_or_else(|| {
                BoxingError::shape_mismatch(format!(
                    "rank {} is in {placement} but provided no local shard",
                    self.rank
                ))
            })?;
            let expected = shard_view(&global_shape, placement.grid(), &distribution, self.rank)?;
            if buffer.shape() != expected.shape.as_slice() {
                return Err(BoxingError::shape_mismatch(format!(
                    "local shard is {:?} but {distribution} over {placement} gives rank {} the shape {:?}",
                    buffer.shape(),
                    self.rank,
                    expected.shape
                ))
                .with_placement(&placement));
            }
            if buffer.dtype() != dtype {
                return Err(BoxingError::shape_mismatch(format!(
                    "local shard is {} but the tensor is declared {dtype}",
                    buffer.dtype()
                )));
            }
            Some(buffer.to_device(placement.device()))
        } else {
            if local.is_some() {
                return Err(BoxingError::shape_mismatch(format!(
                    "rank {} is not in {placement} but provided a local shard",
                    self.rank
                )));
            }
            None
        };
        Ok(ConsistentTensor::new_unchecked(
            global_shape,
            dtype,
            placement,
            distribution,
            local,
        ))
    }

    /// Builds a consistent tensor from per-rank local buffers, deriving the
    /// global shape. Split axes concatenate the locals as shards, partial
    /// axes treat them as contributions, and broadcast axes are
    /// synchronized from coordinate 0 (that member's value wins).
    pub fn lift(
        &self,
        local: LocalBuffer,
        placement: Placement,
        distribution: Distribution,
    ) -> Result<ConsistentTensor, BoxingError> {
        if !placement.contains_rank(self.rank) {
            return Err(BoxingError::rank_not_in_placement(self.rank, &placement));
        }
        self.check_device(&placement)?;
        let grid = placement.grid();
        if distribution.ndim() != grid.ndim() {
            return Err(BoxingError::spec_invalid(format!(
                "distribution {distribution} has {} entries for a {}-axis grid",
                distribution.ndim(),
                grid.ndim()
            )));
        }
        for sbp in distribution.iter() {
            if let Some(d) = sbp.split_dim() {
                if d >= local.shape().len() {
                    return Err(BoxingError::spec_invalid(format!(
                        "{sbp} refers to tensor dim {d} but the local buffer is {:?}",
                        local.shape()
                    )));
                }
            }
        }
        let local = local.to_device(placement.device());

        // Exchange (shape, dtype) so every member derives the same global
        // frame and can validate everyone else's piece against it.
        let comm = communicator(&placement, self.rank, self.config.transport_timeout)?;
        let meta = postcard::to_stdvec(&LiftMeta {
            shape: local.shape().to_vec(),
            dtype: local.dtype(),
        })
        .map_err(|e| BoxingError::transport_failed(e.to_string()))?;
        let gathered = comm
            .all_gather_bytes(meta)
            .map_err(|e| BoxingError::from(e).with_placement(&placement))?;
        let metas: Vec<LiftMeta> = gathered
            .iter()
            .map(|bytes| {
                postcard::from_bytes(bytes.as_slice())
                    .map_err(|e| BoxingError::transport_failed(e.to_string()))
            })
            .collect::<Result<_, _>>()?;

        let my_coord = grid
            .coord_of(self.rank)
            .ok_or_else(|| BoxingError::rank_not_in_placement(self.rank, &placement))?;
        let mut global_shape = local.shape().to_vec();
        for (dim, extent) in global_shape.iter_mut().enumerate() {
            let split_axes: Vec<usize> = (0..distribution.ndim())
                .filter(|&a| distribution.entry(a).split_dim() == Some(dim))
                .collect();
            if split_axes.is_empty() {
                continue;
            }
            // Sum the extents over the members reachable by varying only
            // the splitting axes from this rank's coordinate.
            *extent = grid
                .ranks()
                .iter()
                .enumerate()
                .filter(|(_, &member)| {
                    let coord = grid.coord_of(member).expect("member of own grid");
                    (0..grid.ndim())
                        .all(|a| split_axes.contains(&a) || coord[a] == my_coord[a])
                })
                .map(|(position, _)| metas[position].shape[dim])
                .sum();
        }

        for (position, &member) in grid.ranks().iter().enumerate() {
            let meta = &metas[position];
            if meta.dtype != local.dtype() {
                return Err(BoxingError::shape_mismatch(format!(
                    "rank {member} lifted {} where this rank lifted {}",
                    meta.dtype,
                    local.dtype()
                ))
                .with_placement(&placement));
            }
            let coord = grid.coord_of(member).expect("member of own grid");
            let expected = shard_view_at(&global_shape, grid, &distribution, &coord);
            if meta.shape != expected.shape {
                return Err(BoxingError::shape_mismatch(format!(
                    "rank {member} lifted {:?} but the balanced rule gives it {:?} of global {global_shape:?}",
                    meta.shape, expected.shape
                ))
                .with_placement(&placement));
            }
        }
        distribution.validate_for(grid, &global_shape)?;

        let mut local = local;
        for axis in 0..distribution.ndim() {
            if distribution.entry(axis).is_broadcast() && grid.dim(axis) > 1 {
                let axis_comm =
                    axis_communicator(&placement, axis, self.rank, self.config.transport_timeout)?;
                let root = axis_comm.members()[0];
                local = broadcast_buffer(&axis_comm, root, Some(&local), placement.device())
                    .map_err(|e| BoxingError::from(e).with_placement(&placement).with_axis(axis))?;
            }
        }

        debug!(rank = self.rank, placement = %placement, distribution = %distribution,
               shape = ?global_shape, "lifted local tensor");
        Ok(ConsistentTensor::new_unchecked(
            global_shape,
            local.dtype(),
            placement,
            distribution,
            Some(local),
        ))
    }

    /// Transforms a consistent tensor to a new (placement, distribution).
    /// The input is never mutated; the returned tensor's local shard is
    /// materialized iff this rank is in the destination placement.
    pub fn box_to(
        &self,
        tensor: &ConsistentTensor,
        dst_placement: Placement,
        dst_distribution: Distribution,
    ) -> Result<ConsistentTensor, BoxingError> {
        self.check_residency(tensor)?;
        self.check_device(&dst_placement)?;
        let route = plan(
            tensor.placement(),
            tensor.distribution(),
            &dst_placement,
            &dst_distribution,
            tensor.global_shape(),
            &self.config,
        )?;
        debug!(rank = self.rank,
               src_placement = %tensor.placement(),
               src = %tensor.distribution(),
               dst_placement = %dst_placement,
               dst = %dst_distribution,
               steps = route.steps.len(),
               "boxing");
        execute(
            &route,
            tensor,
            &dst_placement,
            &dst_distribution,
            self.rank,
            self.kernel.as_ref(),
            &self.config,
        )
    }

    /// Local sanity pass over the input tensor, before any collective is
    /// entered.
    fn check_residency(&self, tensor: &ConsistentTensor) -> Result<(), BoxingError> {
        if tensor.placement().contains_rank(self.rank) {
            let buffer = tensor.local().ok_or_else(|| {
                BoxingError::shape_mismatch(format!(
                    "rank {} is in {} but the tensor has no local shard",
                    self.rank,
                    tensor.placement()
                ))
            })?;
            let expected = shard_view(
                tensor.global_shape(),
                tensor.placement().grid(),
                tensor.distribution(),
                self.rank,
            )?;
            if buffer.shape() != expected.shape.as_slice() {
                return Err(BoxingError::shape_mismatch(format!(
                    "local shard is {:?} but the calculator expects {:?}",
                    buffer.shape(),
                    expected.shape
                ))
                .with_placement(tensor.placement()));
            }
        } else if tensor.local().is_some() {
            return Err(BoxingError::shape_mismatch(format!(
                "rank {} is not in {} but the tensor has a local shard",
                self.rank,
                tensor.placement()
            )));
        }
        Ok(())
    }

    fn check_device(&self, placement: &Placement) -> Result<(), BoxingError> {
        if self.config.cpu_only && placement.device() == DeviceKind::Accelerator {
            return Err(
                BoxingError::spec_invalid("accelerator placement in cpu-only mode")
                    .with_placement(placement),
            );
        }
        Ok(())
    }
}
