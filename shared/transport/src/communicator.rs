use crate::error::TransportError;
use crate::fabric::GroupState;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use weft_core::{DeviceKind, RankId};

/// A handle onto one rank's view of a rank group.
///
/// Every member must issue the same sequence of calls in the same order;
/// collective results come back in member order, which is the coordinate
/// order of the placement (or axis group) the handle was derived from.
#[derive(Clone)]
pub struct Communicator {
    device: DeviceKind,
    members: Vec<RankId>,
    me: RankId,
    my_index: usize,
    stream: u64,
    state: Arc<GroupState>,
    timeout: Duration,
}

impl Communicator {
    pub(crate) fn new(
        device: DeviceKind,
        members: Vec<RankId>,
        me: RankId,
        state: Arc<GroupState>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let my_index = members
            .iter()
            .position(|&r| r == me)
            .ok_or(TransportError::UnknownPeer(me))?;
        let mut hasher = DefaultHasher::new();
        members.hash(&mut hasher);
        Ok(Communicator {
            device,
            members,
            me,
            my_index,
            stream: hasher.finish(),
            state,
            timeout,
        })
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    pub fn members(&self) -> &[RankId] {
        &self.members
    }

    pub fn me(&self) -> RankId {
        self.me
    }

    pub fn my_index(&self) -> usize {
        self.my_index
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Enqueues a payload for `to`. Never blocks; per-pair FIFO order is
    /// preserved.
    pub fn send_bytes(&self, to: RankId, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.members.contains(&to) {
            return Err(TransportError::UnknownPeer(to));
        }
        self.state.send(self.me, to, payload);
        Ok(())
    }

    /// Blocks until a payload from `from` arrives or the timeout fires.
    pub fn recv_bytes(&self, from: RankId) -> Result<Vec<u8>, TransportError> {
        if !self.members.contains(&from) {
            return Err(TransportError::UnknownPeer(from));
        }
        self.state.recv(from, self.me, &self.members, self.timeout)
    }

    /// Collective all-gather of raw payloads, returned in member order.
    pub fn all_gather_bytes(&self, payload: Vec<u8>) -> Result<Vec<Arc<Vec<u8>>>, TransportError> {
        let slots = self
            .state
            .exchange(self.stream, self.me, &self.members, payload, self.timeout)?;
        Ok(self
            .members
            .iter()
            .map(|m| slots[m].clone())
            .collect())
    }

    /// Collective broadcast: every member gets the root's payload. Non-root
    /// members contribute an empty payload to the rendezvous.
    pub fn broadcast_bytes(
        &self,
        root: RankId,
        payload: Vec<u8>,
    ) -> Result<Arc<Vec<u8>>, TransportError> {
        if !self.members.contains(&root) {
            return Err(TransportError::UnknownPeer(root));
        }
        let mine = if self.me == root { payload } else { Vec::new() };
        let slots = self
            .state
            .exchange(self.stream, self.me, &self.members, mine, self.timeout)?;
        Ok(slots[&root].clone())
    }
}
