use crate::communicator::Communicator;
use crate::fabric::GroupState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::debug;
use weft_core::{BoxingError, DeviceKind, Placement, RankId};

/// Process-wide communicator state, keyed by device kind, sorted rank set,
/// and hierarchy. Initialized lazily on first use, reused across boxings,
/// and torn down only at process exit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CommKey {
    device: DeviceKind,
    ranks: Vec<RankId>,
    hierarchy: Vec<usize>,
}

static REGISTRY: OnceLock<Mutex<HashMap<CommKey, Arc<GroupState>>>> = OnceLock::new();

fn state_for(key: CommKey) -> Arc<GroupState> {
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock().unwrap();
    map.entry(key.clone())
        .or_insert_with(|| {
            debug!(device = %key.device, ranks = ?key.ranks, hierarchy = ?key.hierarchy, "initializing communicator group");
            Arc::new(GroupState::new())
        })
        .clone()
}

fn sorted(mut ranks: Vec<RankId>) -> Vec<RankId> {
    ranks.sort_unstable();
    ranks
}

/// Communicator over every rank of a placement, in coordinate order.
pub fn communicator(
    placement: &Placement,
    me: RankId,
    timeout: Duration,
) -> Result<Communicator, BoxingError> {
    if !placement.contains_rank(me) {
        return Err(BoxingError::rank_not_in_placement(me, placement));
    }
    let state = state_for(CommKey {
        device: placement.device(),
        ranks: sorted(placement.ranks().to_vec()),
        hierarchy: placement.grid().hierarchy().to_vec(),
    });
    Communicator::new(
        placement.device(),
        placement.ranks().to_vec(),
        me,
        state,
        timeout,
    )
    .map_err(|e| BoxingError::from(e).with_placement(placement))
}

/// Communicator over the ranks that share every coordinate with `me`
/// except along `axis`, in coordinate order along that axis.
pub fn axis_communicator(
    placement: &Placement,
    axis: usize,
    me: RankId,
    timeout: Duration,
) -> Result<Communicator, BoxingError> {
    let members = placement
        .grid()
        .axis_members(axis, me)
        .ok_or_else(|| BoxingError::rank_not_in_placement(me, placement).with_axis(axis))?;
    let state = state_for(CommKey {
        device: placement.device(),
        ranks: sorted(members.clone()),
        hierarchy: vec![members.len()],
    });
    Communicator::new(placement.device(), members, me, state, timeout)
        .map_err(|e| BoxingError::from(e).with_placement(placement).with_axis(axis))
}

/// Communicator spanning two placements for paired point-to-point bridges.
/// Bridge traffic always stages through host memory, so the group is keyed
/// on the host device regardless of either placement's kind.
pub fn bridge_communicator(
    src: &Placement,
    dst: &Placement,
    me: RankId,
    timeout: Duration,
) -> Result<Communicator, BoxingError> {
    let mut union = src.ranks().to_vec();
    for &r in dst.ranks() {
        if !union.contains(&r) {
            union.push(r);
        }
    }
    let union = sorted(union);
    if !union.contains(&me) {
        return Err(BoxingError::rank_not_in_placement(me, src));
    }
    let state = state_for(CommKey {
        device: DeviceKind::Host,
        ranks: union.clone(),
        hierarchy: vec![union.len()],
    });
    Communicator::new(DeviceKind::Host, union, me, state, timeout)
        .map_err(|e| BoxingError::from(e).with_placement(src))
}
