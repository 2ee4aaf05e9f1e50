use crate::communicator::Communicator;
use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use tracing::trace;
use weft_core::{DType, DeviceKind, LocalBuffer, LocalKernel, RankId};

/// On-the-wire form of a buffer. Accelerator buffers are staged to host
/// before encoding and re-tagged with the receiver's device after decoding.
#[derive(Serialize, Deserialize)]
struct Packet {
    shape: Vec<usize>,
    dtype: DType,
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
}

pub(crate) fn encode(buffer: &LocalBuffer) -> Result<Vec<u8>, TransportError> {
    let staged = buffer.to_device(DeviceKind::Host);
    let packet = Packet {
        shape: staged.shape().to_vec(),
        dtype: staged.dtype(),
        data: staged.into_bytes(),
    };
    Ok(postcard::to_stdvec(&packet)?)
}

pub(crate) fn decode(bytes: &[u8], device: DeviceKind) -> Result<LocalBuffer, TransportError> {
    let packet: Packet = postcard::from_bytes(bytes)?;
    LocalBuffer::from_parts(packet.shape, packet.dtype, DeviceKind::Host, packet.data)
        .map(|b| b.to_device(device))
        .map_err(|e| TransportError::Payload(e.to_string()))
}

/// Gathers every member's buffer and concatenates along `dim` in member
/// order. `member_shapes` gives the expected shape per member; a zero-sized
/// shard still participates with an empty payload.
pub fn all_gather_concat(
    comm: &Communicator,
    buffer: &LocalBuffer,
    dim: usize,
    member_shapes: &[Vec<usize>],
) -> Result<LocalBuffer, TransportError> {
    trace!(me = comm.me(), members = ?comm.members(), dim, "all-gather");
    let gathered = comm.all_gather_bytes(encode(buffer)?)?;
    let mut parts = Vec::with_capacity(gathered.len());
    for ((bytes, &from), expected) in gathered
        .iter()
        .zip(comm.members())
        .zip(member_shapes.iter())
    {
        let part = decode(bytes.as_slice(), buffer.device())?;
        if part.shape() != expected.as_slice() {
            return Err(TransportError::PayloadShape {
                from,
                expected: expected.clone(),
                got: part.shape().to_vec(),
            });
        }
        parts.push(part);
    }
    LocalBuffer::concat(&parts, dim).map_err(|e| TransportError::Payload(e.to_string()))
}

/// Sums every member's buffer element-wise. Accumulation runs in member
/// order on every rank so results are byte-identical across the group.
pub fn all_reduce_sum(
    comm: &Communicator,
    buffer: &LocalBuffer,
    kernel: &dyn LocalKernel,
) -> Result<LocalBuffer, TransportError> {
    trace!(me = comm.me(), members = ?comm.members(), "all-reduce");
    let gathered = comm.all_gather_bytes(encode(buffer)?)?;
    let mut acc: Option<LocalBuffer> = None;
    for bytes in &gathered {
        let part = decode(bytes.as_slice(), buffer.device())?;
        match acc.as_mut() {
            None => acc = Some(part),
            Some(acc) => kernel
                .accumulate(acc, &part)
                .map_err(TransportError::Kernel)?,
        }
    }
    acc.ok_or(TransportError::Payload("empty reduction group".into()))
}

/// Sums across the group and scatters along `dim`: member `j` ends up with
/// the sum of every member's `member_ranges[j]` piece. Ranges are relative
/// to `buffer`'s own extent along `dim`.
pub fn reduce_scatter_sum(
    comm: &Communicator,
    buffer: &LocalBuffer,
    dim: usize,
    member_ranges: &[(usize, usize)],
    kernel: &dyn LocalKernel,
) -> Result<LocalBuffer, TransportError> {
    trace!(me = comm.me(), members = ?comm.members(), dim, "reduce-scatter");
    let pieces = buffer.split_dim(dim, member_ranges);
    for (&member, piece) in comm.members().iter().zip(pieces.iter()) {
        if member != comm.me() {
            comm.send_bytes(member, encode(piece)?)?;
        }
    }
    let mut contributions = Vec::with_capacity(comm.size());
    for &member in comm.members() {
        if member == comm.me() {
            contributions.push(pieces[comm.my_index()].clone());
        } else {
            contributions.push(decode(&comm.recv_bytes(member)?, buffer.device())?);
        }
    }
    let mut iter = contributions.into_iter();
    let mut acc = iter
        .next()
        .ok_or(TransportError::Payload("empty reduction group".into()))?;
    for part in iter {
        kernel
            .accumulate(&mut acc, &part)
            .map_err(TransportError::Kernel)?;
    }
    Ok(acc)
}

/// Ships one buffer to a peer over the pairwise mailbox. Never blocks.
pub fn send_buffer(
    comm: &Communicator,
    to: RankId,
    buffer: &LocalBuffer,
) -> Result<(), TransportError> {
    trace!(me = comm.me(), to, "send");
    comm.send_bytes(to, encode(buffer)?)
}

/// Receives one buffer from a peer, re-tagged onto `device`.
pub fn recv_buffer(
    comm: &Communicator,
    from: RankId,
    device: DeviceKind,
) -> Result<LocalBuffer, TransportError> {
    trace!(me = comm.me(), from, "recv");
    decode(&comm.recv_bytes(from)?, device)
}

/// Replicates the root member's buffer to the whole group.
pub fn broadcast_buffer(
    comm: &Communicator,
    root: RankId,
    payload: Option<&LocalBuffer>,
    device: DeviceKind,
) -> Result<LocalBuffer, TransportError> {
    trace!(me = comm.me(), members = ?comm.members(), root, "broadcast");
    let mine = match payload {
        Some(buffer) if comm.me() == root => encode(buffer)?,
        _ => Vec::new(),
    };
    if comm.me() == root && payload.is_none() {
        return Err(TransportError::Payload(
            "broadcast root has no payload".into(),
        ));
    }
    let bytes = comm.broadcast_bytes(root, mine)?;
    decode(bytes.as_slice(), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::run_ranks;
    use crate::registry;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::time::Duration;
    use test_log::test;
    use weft_core::{HostKernel, Placement};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn buffer(values: &[f32], shape: &[usize]) -> LocalBuffer {
        LocalBuffer::from_slice(values, shape, DeviceKind::Host).unwrap()
    }

    #[test]
    #[serial]
    fn test_all_gather_concat_uneven() {
        let placement = Placement::host(vec![100, 101, 102]).unwrap();
        let shapes = [vec![2usize, 2], vec![1, 2], vec![1, 2]];
        let results = run_ranks(placement.ranks(), |rank| {
            let comm = registry::communicator(&placement, rank, TIMEOUT).unwrap();
            let mine = match rank {
                100 => buffer(&[0.0, 1.0, 2.0, 3.0], &[2, 2]),
                101 => buffer(&[4.0, 5.0], &[1, 2]),
                _ => buffer(&[6.0, 7.0], &[1, 2]),
            };
            all_gather_concat(&comm, &mine, 0, &shapes).unwrap()
        });
        for result in results {
            assert_eq!(result.shape(), &[4, 2]);
            assert_eq!(
                result.to_vec::<f32>().unwrap(),
                vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]
            );
        }
    }

    #[test]
    #[serial]
    fn test_all_reduce_sums_in_member_order() {
        let placement = Placement::host(vec![110, 111]).unwrap();
        let results = run_ranks(placement.ranks(), |rank| {
            let comm = registry::communicator(&placement, rank, TIMEOUT).unwrap();
            let mine = buffer(&[rank as f32, 1.0], &[2]);
            all_reduce_sum(&comm, &mine, &HostKernel).unwrap()
        });
        for result in results {
            assert_eq!(result.to_vec::<f32>().unwrap(), vec![221.0, 2.0]);
        }
    }

    #[test]
    #[serial]
    fn test_reduce_scatter_gives_each_member_its_piece() {
        let placement = Placement::host(vec![120, 121]).unwrap();
        let ranges = [(0usize, 1usize), (1, 3)];
        let mut results = run_ranks(placement.ranks(), |rank| {
            let comm = registry::communicator(&placement, rank, TIMEOUT).unwrap();
            let mine = buffer(&[1.0, 2.0, 3.0], &[3]);
            (rank, reduce_scatter_sum(&comm, &mine, 0, &ranges, &HostKernel).unwrap())
        });
        results.sort_by_key(|(rank, _)| *rank);
        assert_eq!(results[0].1.to_vec::<f32>().unwrap(), vec![2.0]);
        assert_eq!(results[1].1.to_vec::<f32>().unwrap(), vec![4.0, 6.0]);
    }

    #[test]
    #[serial]
    fn test_broadcast_replicates_root() {
        let placement = Placement::host(vec![130, 131, 132]).unwrap();
        let results = run_ranks(placement.ranks(), |rank| {
            let comm = registry::communicator(&placement, rank, TIMEOUT).unwrap();
            let mine = buffer(&[rank as f32], &[1]);
            broadcast_buffer(&comm, 131, Some(&mine), DeviceKind::Host).unwrap()
        });
        for result in results {
            assert_eq!(result.to_vec::<f32>().unwrap(), vec![131.0]);
        }
    }

    #[test]
    #[serial]
    fn test_axis_subgroups_gather_independently() {
        // A (2, 2) grid splits into two disjoint groups along each axis;
        // both inner groups gather concurrently without cross-talk.
        let placement = Placement::with_hierarchy(
            DeviceKind::Host,
            vec![160, 161, 162, 163],
            vec![2, 2],
        )
        .unwrap();
        let shapes = [vec![1usize, 2], vec![1, 2]];
        let mut results = run_ranks(placement.ranks(), |rank| {
            let comm = registry::axis_communicator(&placement, 1, rank, TIMEOUT).unwrap();
            let mine = buffer(&[rank as f32, rank as f32], &[1, 2]);
            (rank, all_gather_concat(&comm, &mine, 0, &shapes).unwrap())
        });
        results.sort_by_key(|(rank, _)| *rank);
        for (rank, gathered) in results {
            let group = if rank < 162 { [160.0, 160.0, 161.0, 161.0] } else { [162.0, 162.0, 163.0, 163.0] };
            assert_eq!(gathered.to_vec::<f32>().unwrap(), group, "rank {rank}");
        }
    }

    #[test]
    #[serial]
    fn test_p2p_fifo_order() {
        let placement = Placement::host(vec![140, 141]).unwrap();
        run_ranks(placement.ranks(), |rank| {
            let comm = registry::communicator(&placement, rank, TIMEOUT).unwrap();
            if rank == 140 {
                comm.send_bytes(141, vec![1]).unwrap();
                comm.send_bytes(141, vec![2]).unwrap();
            } else {
                assert_eq!(comm.recv_bytes(140).unwrap(), vec![1]);
                assert_eq!(comm.recv_bytes(140).unwrap(), vec![2]);
            }
        });
    }

    #[test]
    #[serial]
    fn test_missing_peer_times_out() {
        // Rank 151 never shows up; 150 must report a timeout instead of
        // hanging.
        let placement = Placement::host(vec![150, 151]).unwrap();
        let comm = registry::communicator(&placement, 150, Duration::from_millis(50)).unwrap();
        let mine = buffer(&[1.0], &[1]);
        let err = all_reduce_sum(&comm, &mine, &HostKernel).unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }

    #[test]
    #[serial]
    fn test_staging_retags_accelerator_buffers() {
        let bytes = encode(&buffer(&[1.0, 2.0], &[2]).to_device(DeviceKind::Accelerator)).unwrap();
        let decoded = decode(&bytes, DeviceKind::Accelerator).unwrap();
        assert_eq!(decoded.device(), DeviceKind::Accelerator);
        assert_eq!(decoded.to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
    }
}
