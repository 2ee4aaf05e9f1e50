use crate::error::TransportError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use weft_core::RankId;

/// Shared rendezvous state for one set of ranks.
///
/// Point-to-point traffic goes through per-pair FIFO mailboxes. Collectives
/// go through generation-counted rounds: each participant deposits its
/// payload under `(stream, round)`, waits until the round is full, reads
/// every slot, and the last reader retires the round. Streams separate
/// logically distinct communicators that happen to share a rank set, and the
/// per-rank round counters live here so that a fresh handle continues where
/// the previous one left off.
pub(crate) struct GroupState {
    mail: Mutex<HashMap<(RankId, RankId), VecDeque<Vec<u8>>>>,
    mail_cvar: Condvar,
    gather: Mutex<GatherLedger>,
    gather_cvar: Condvar,
}

#[derive(Default)]
struct GatherLedger {
    counters: HashMap<(u64, RankId), u64>,
    rounds: HashMap<(u64, u64), Round>,
}

struct Round {
    slots: HashMap<RankId, Arc<Vec<u8>>>,
    readers_left: usize,
}

impl GroupState {
    pub(crate) fn new() -> Self {
        GroupState {
            mail: Mutex::new(HashMap::new()),
            mail_cvar: Condvar::new(),
            gather: Mutex::new(GatherLedger::default()),
            gather_cvar: Condvar::new(),
        }
    }

    pub(crate) fn send(&self, from: RankId, to: RankId, payload: Vec<u8>) {
        let mut mail = self.mail.lock().unwrap();
        mail.entry((from, to)).or_default().push_back(payload);
        self.mail_cvar.notify_all();
    }

    pub(crate) fn recv(
        &self,
        from: RankId,
        to: RankId,
        members: &[RankId],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut mail = self.mail.lock().unwrap();
        loop {
            if let Some(payload) = mail.get_mut(&(from, to)).and_then(VecDeque::pop_front) {
                return Ok(payload);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout {
                    what: "recv",
                    members: members.to_vec(),
                    timeout,
                });
            }
            let (guard, _) = self.mail_cvar.wait_timeout(mail, remaining).unwrap();
            mail = guard;
        }
    }

    /// Deposits `payload` for the caller's next round on `stream` and
    /// returns every member's payload once all of them have arrived.
    pub(crate) fn exchange(
        &self,
        stream: u64,
        me: RankId,
        members: &[RankId],
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<HashMap<RankId, Arc<Vec<u8>>>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut ledger = self.gather.lock().unwrap();

        let counter = ledger.counters.entry((stream, me)).or_insert(0);
        let round_id = (stream, *counter);
        *counter += 1;

        let round = ledger.rounds.entry(round_id).or_insert_with(|| Round {
            slots: HashMap::new(),
            readers_left: members.len(),
        });
        round.slots.insert(me, Arc::new(payload));
        if round.slots.len() == members.len() {
            self.gather_cvar.notify_all();
        }

        loop {
            let full = ledger
                .rounds
                .get(&round_id)
                .map(|r| r.slots.len() == members.len())
                .unwrap_or(false);
            if full {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout {
                    what: "collective",
                    members: members.to_vec(),
                    timeout,
                });
            }
            let (guard, _) = self.gather_cvar.wait_timeout(ledger, remaining).unwrap();
            ledger = guard;
        }

        let round = ledger.rounds.get_mut(&round_id).unwrap();
        let slots = round.slots.clone();
        round.readers_left -= 1;
        if round.readers_left == 0 {
            ledger.rounds.remove(&round_id);
        }
        Ok(slots)
    }
}
