//! Per-key request sequencing.
//!
//! Every request issued for a key gets a token from a monotonically
//! increasing counter. A response may only be applied when its token is
//! newer than the last one applied for the same key, so a slow older
//! response can never overwrite a newer one.

use std::collections::HashMap;
use std::hash::Hash;

/// Whether to issue a request while another one for the key is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Suppress the request if one is already in flight.
    IfIdle,
    /// Always issue; ordering is left to the token rule.
    Always,
}

/// Outcome of completing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Apply,
    Stale,
}

/// Proof that a request was issued for `key` with sequence number `token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket<K> {
    pub key: K,
    pub token: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    issued: u64,
    applied: u64,
    in_flight: usize,
}

#[derive(Debug)]
pub struct RequestSequencer<K> {
    slots: HashMap<K, Slot>,
}

impl<K> Default for RequestSequencer<K> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> RequestSequencer<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a ticket, or `None` when `IfIdle` and a request is in flight.
    pub fn begin(&mut self, key: K, admission: Admission) -> Option<Ticket<K>> {
        let slot = self.slots.entry(key.clone()).or_default();
        if admission == Admission::IfIdle && slot.in_flight > 0 {
            return None;
        }
        slot.issued += 1;
        slot.in_flight += 1;
        Some(Ticket {
            key,
            token: slot.issued,
        })
    }

    /// Completes a successful request. On `Apply` the ticket's token becomes
    /// the key's applied token.
    pub fn finish(&mut self, ticket: &Ticket<K>) -> Verdict {
        let slot = self.slots.entry(ticket.key.clone()).or_default();
        slot.in_flight = slot.in_flight.saturating_sub(1);
        if ticket.token > slot.applied {
            slot.applied = ticket.token;
            Verdict::Apply
        } else {
            Verdict::Stale
        }
    }

    /// Releases a failed or dropped request without touching the applied token.
    pub fn abandon(&mut self, ticket: &Ticket<K>) {
        if let Some(slot) = self.slots.get_mut(&ticket.key) {
            slot.in_flight = slot.in_flight.saturating_sub(1);
        }
    }

    /// Records a local mutation as the newest state of `key`; every request
    /// issued before this call becomes stale.
    pub fn supersede(&mut self, key: K) -> u64 {
        let slot = self.slots.entry(key).or_default();
        slot.issued += 1;
        slot.applied = slot.issued;
        slot.applied
    }

    pub fn in_flight(&self, key: &K) -> usize {
        self.slots.get(key).map_or(0, |s| s.in_flight)
    }

    pub fn applied_token(&self, key: &K) -> u64 {
        self.slots.get(key).map_or(0, |s| s.applied)
    }
}
