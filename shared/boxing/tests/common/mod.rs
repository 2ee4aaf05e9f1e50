#![allow(dead_code)]

use std::collections::HashMap;
use weft_boxing::{BoxingEngine, ConsistentTensor};
use weft_core::{
    shard_view, DType, DeviceKind, Distribution, Grid, HostKernel, LocalBuffer, LocalKernel,
    Placement, RankId, Sbp,
};

pub const WORLD: [RankId; 4] = [0, 1, 2, 3];

pub fn engine(rank: RankId) -> BoxingEngine {
    BoxingEngine::new(rank)
}

pub fn host(ranks: &[RankId]) -> Placement {
    Placement::host(ranks.to_vec()).unwrap()
}

pub fn host_grid(ranks: &[RankId], hierarchy: &[usize]) -> Placement {
    Placement::new(
        DeviceKind::Host,
        Grid::with_hierarchy(ranks.to_vec(), hierarchy.to_vec()).unwrap(),
    )
}

pub fn accel(ranks: &[RankId]) -> Placement {
    Placement::new(DeviceKind::Accelerator, Grid::new(ranks.to_vec()).unwrap())
}

pub fn dist(entries: &[Sbp]) -> Distribution {
    Distribution::new(entries.to_vec())
}

/// A full global tensor with every element distinct.
pub fn counting_global(shape: &[usize]) -> LocalBuffer {
    let numel: usize = shape.iter().product();
    let values: Vec<f32> = (0..numel).map(|i| i as f32).collect();
    LocalBuffer::from_slice(&values, shape, DeviceKind::Host).unwrap()
}

/// This rank's local buffer for `distribution` over a known global value.
/// Split axes slice the shard out; partial axes decompose the shard into
/// disjoint element masks so the contributions sum back to the global.
pub fn local_from_global(
    global: &LocalBuffer,
    placement: &Placement,
    distribution: &Distribution,
    rank: RankId,
) -> Option<LocalBuffer> {
    if !placement.contains_rank(rank) {
        return None;
    }
    let grid = placement.grid();
    let view = shard_view(global.shape(), grid, distribution, rank).unwrap();
    let mut shard = global.clone();
    for (dim, &(begin, end)) in view.intervals.iter().enumerate() {
        shard = shard.slice_dim(dim, begin, end);
    }
    if view.partial {
        let coord = grid.coord_of(rank).unwrap();
        let partial_axes: Vec<usize> = (0..distribution.ndim())
            .filter(|&a| distribution.entry(a).is_partial())
            .collect();
        let group: usize = partial_axes.iter().map(|&a| grid.dim(a)).product();
        let mut my_index = 0;
        for &a in &partial_axes {
            my_index = my_index * grid.dim(a) + coord[a];
        }
        let shape = shard.shape().to_vec();
        let mut values = shard.to_vec::<f32>().unwrap();
        for (i, value) in values.iter_mut().enumerate() {
            if i % group != my_index {
                *value = 0.0;
            }
        }
        shard = LocalBuffer::from_slice(&values, &shape, DeviceKind::Host).unwrap();
    }
    Some(shard.to_device(placement.device()))
}

pub fn tensor_from_global(
    engine: &BoxingEngine,
    global: &LocalBuffer,
    placement: &Placement,
    distribution: &Distribution,
) -> ConsistentTensor {
    let local = local_from_global(global, placement, distribution, engine.rank());
    engine
        .make_consistent(
            local,
            global.shape().to_vec(),
            global.dtype(),
            placement.clone(),
            distribution.clone(),
        )
        .unwrap()
}

/// Reconstructs the global value from every rank's shard, checking shard
/// shapes and broadcast-replica agreement along the way.
pub fn materialize(
    per_rank: &[(RankId, Option<LocalBuffer>)],
    placement: &Placement,
    distribution: &Distribution,
    global_shape: &[usize],
) -> LocalBuffer {
    let grid = placement.grid();
    let locals: HashMap<RankId, &Option<LocalBuffer>> =
        per_rank.iter().map(|(rank, local)| (*rank, local)).collect();
    let broadcast_axes: Vec<usize> = (0..distribution.ndim())
        .filter(|&a| distribution.entry(a).is_broadcast())
        .collect();

    let kernel = HostKernel;
    let mut acc = LocalBuffer::zeros(global_shape, DType::F32, DeviceKind::Host);
    for &rank in grid.ranks() {
        let coord = grid.coord_of(rank).unwrap();
        let local = locals[&rank]
            .as_ref()
            .unwrap_or_else(|| panic!("rank {rank} of {placement} has no shard"))
            .to_device(DeviceKind::Host);
        let view = shard_view(global_shape, grid, distribution, rank).unwrap();
        assert_eq!(
            local.shape(),
            view.shape.as_slice(),
            "rank {rank} shard shape under {distribution}"
        );
        if broadcast_axes.iter().any(|&a| coord[a] != 0) {
            // A replica; it must agree with its coordinate-0 counterpart.
            let mut base_coord = coord.clone();
            for &a in &broadcast_axes {
                base_coord[a] = 0;
            }
            let base_rank = grid.rank_at(&base_coord).unwrap();
            let base = locals[&base_rank].as_ref().unwrap().to_device(DeviceKind::Host);
            assert_eq!(local, base, "broadcast replicas of rank {base_rank} and {rank} differ");
            continue;
        }
        let origin: Vec<usize> = view.intervals.iter().map(|(begin, _)| *begin).collect();
        let embedded = local.embedded(global_shape, &origin).unwrap();
        kernel.accumulate(&mut acc, &embedded).unwrap();
    }
    acc
}

pub fn assert_same_values(got: &LocalBuffer, expected: &LocalBuffer, context: &str) {
    assert_eq!(
        got.to_vec::<f32>().unwrap(),
        expected.to_vec::<f32>().unwrap(),
        "{context}"
    );
}
