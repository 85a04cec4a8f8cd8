// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Owned ring state for one peer: successors, predecessors, liveness
//! bookkeeping, and the hash-routing decision. A single [`PeerState`] value
//! is mutated sequentially by the peer actor — every inbound datagram,
//! stream message, tick, and command becomes one call into this module.

use crate::wire::RingSlot;

/// Sentinel for an unset predecessor slot.
pub const INVALID: i16 = -1;

/// Missed-ack count at which a successor is declared dead.
const DEATH_THRESHOLD: u16 = 4;

/// Outcome of routing a file hash against this peer's local view of the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// This peer owns the file.
    Available,
    /// The immediate successor (s1) owns the file.
    NextAvailable,
    /// Neither this peer nor s1 owns the file; forward further.
    NotAvailable,
}

/// Which successor slot an operation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    S1,
    S2,
}

/// Owned mutable state of one ring peer.
#[derive(Debug, Clone)]
pub struct PeerState {
    pub self_id: u8,

    s1: RingSlot,
    s2: RingSlot,
    /// Set when a slot was just marked dead and is awaiting a fresh
    /// successor before its ack baseline can be trusted again.
    s1_just_died: bool,
    s2_just_died: bool,

    p1: i16,
    p2: i16,

    last_dead: Option<u8>,

    seq: u16,
    ack1: u16,
    ack2: u16,

    pub show_pings: bool,
}

impl PeerState {
    pub fn new(self_id: u8, s1: u8, s2: u8, show_pings: bool) -> Self {
        Self {
            self_id,
            s1: RingSlot::Id(s1),
            s2: RingSlot::Id(s2),
            s1_just_died: false,
            s2_just_died: false,
            p1: INVALID,
            p2: INVALID,
            last_dead: None,
            seq: 0,
            ack1: 0,
            ack2: 0,
            show_pings,
        }
    }

    pub fn s1(&self) -> RingSlot {
        self.s1
    }

    pub fn s2(&self) -> RingSlot {
        self.s2
    }

    pub fn p1(&self) -> i16 {
        self.p1
    }

    pub fn p2(&self) -> i16 {
        self.p2
    }

    pub fn last_dead(&self) -> Option<u8> {
        self.last_dead
    }

    pub fn seq(&self) -> u16 {
        self.seq
    }

    // ---- hash routing (§4.4) -------------------------------------------

    /// Owning peer of file `f`: `f mod 256`.
    pub fn owner(f: u16) -> u8 {
        (f % 256) as u8
    }

    /// Decide how to handle file hash `f` given this peer's identity and s1.
    /// Returns NotAvailable whenever s1 is DEAD (there is no next hop to
    /// claim NextAvailable on behalf of, so the only honest answer is to
    /// keep forwarding once s1 is repaired).
    pub fn route(self_id: u8, s1: RingSlot, f: u16) -> RouteDecision {
        let h = Self::owner(f);
        if h == self_id {
            return RouteDecision::Available;
        }
        let RingSlot::Id(s1) = s1 else {
            return RouteDecision::NotAvailable;
        };
        let wraps = s1 < self_id;
        let in_next_range = if wraps {
            (self_id < h && h <= 255) || h <= s1
        } else {
            self_id < h && h <= s1
        };
        if in_next_range {
            RouteDecision::NextAvailable
        } else {
            RouteDecision::NotAvailable
        }
    }

    pub fn route_here(&self, f: u16) -> RouteDecision {
        Self::route(self.self_id, self.s1, f)
    }

    // ---- predecessor learning (§4.5) ------------------------------------

    /// Update predecessor memory from an inbound PING_REQ sender.
    pub fn learn_predecessor(&mut self, x: u8) {
        let x = i16::from(x);
        if self.p1 != INVALID && self.p2 != INVALID && x != self.p1 && x != self.p2 {
            self.p1 = INVALID;
            self.p2 = INVALID;
        }
        if self.p1 == INVALID {
            self.p1 = x;
        } else if self.p2 == INVALID && x != self.p1 {
            self.p2 = x;
        }
    }

    // ---- liveness (§4.2) -------------------------------------------------

    /// Advance to the next tick, returning the outgoing sequence number and
    /// bumping the shared counter.
    pub fn next_tick(&mut self) -> u16 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Record an acknowledgement from `x` carrying sequence `r`, if `x` is
    /// currently s1 or s2. A stale peer id (neither successor) is ignored.
    /// The two checks are independent, not `else if`: in a 2-peer ring s1
    /// and s2 can be the same id, and one ack from that shared neighbour
    /// must refresh both ack baselines, not just the first match.
    pub fn record_ack(&mut self, x: u8, r: u16) {
        if self.s1 == RingSlot::Id(x) {
            self.ack1 = r;
        }
        if self.s2 == RingSlot::Id(x) {
            self.ack2 = r;
        }
    }

    /// Wrap-safe missed-ack count: `(seq - ack + 2^16) mod 2^16`.
    pub fn missed(seq: u16, ack: u16) -> u16 {
        seq.wrapping_sub(ack)
    }

    /// Check each live successor slot against the death threshold. Returns
    /// the slots that died on this call (idempotent: a slot already DEAD is
    /// never reported twice).
    pub fn check_deaths(&mut self) -> Vec<(Slot, u8)> {
        let mut died = Vec::new();
        if let RingSlot::Id(id) = self.s1 {
            if Self::missed(self.seq, self.ack1) >= DEATH_THRESHOLD {
                self.last_dead = Some(id);
                self.s1 = RingSlot::Dead;
                self.s1_just_died = true;
                died.push((Slot::S1, id));
            }
        }
        if let RingSlot::Id(id) = self.s2 {
            if Self::missed(self.seq, self.ack2) >= DEATH_THRESHOLD {
                self.last_dead = Some(id);
                self.s2 = RingSlot::Dead;
                self.s2_just_died = true;
                died.push((Slot::S2, id));
            }
        }
        died
    }

    /// Install a new identity into a slot, clearing its just-died flag and
    /// resetting its ack baseline to the current seq so that no pings have
    /// yet gone unanswered against the fresh neighbour.
    fn install(&mut self, slot: Slot, id: u8) {
        match slot {
            Slot::S1 => {
                self.s1 = RingSlot::Id(id);
                if self.s1_just_died {
                    self.ack1 = self.seq;
                    self.s1_just_died = false;
                }
            }
            Slot::S2 => {
                self.s2 = RingSlot::Id(id);
                if self.s2_just_died {
                    self.ack2 = self.seq;
                    self.s2_just_died = false;
                }
            }
        }
    }

    fn set_slot(&mut self, slot: Slot, value: RingSlot) {
        match value {
            RingSlot::Id(id) => self.install(slot, id),
            RingSlot::Dead => match slot {
                Slot::S1 => self.s1 = RingSlot::Dead,
                Slot::S2 => self.s2 = RingSlot::Dead,
            },
        }
    }

    // ---- churn repair (§4.3) --------------------------------------------

    /// Apply a PC_QUIT from `x` carrying its successor pair. Returns `true`
    /// if it altered this peer's successors (i.e. `x` was s1 or s2).
    pub fn apply_quit(&mut self, x: u8, x_s1: RingSlot, x_s2: RingSlot) -> bool {
        if self.s1 == RingSlot::Id(x) {
            self.set_slot(Slot::S1, x_s1);
            self.set_slot(Slot::S2, x_s2);
            true
        } else if self.s2 == RingSlot::Id(x) {
            self.set_slot(Slot::S2, x_s1);
            true
        } else {
            false
        }
    }

    /// Apply a PC_QUERYRES from `x` carrying its successor pair. Only
    /// meaningful while some slot is DEAD; a no-op otherwise.
    pub fn apply_query_res(&mut self, x_s1: RingSlot, x_s2: RingSlot) {
        if self.s1 == RingSlot::Dead {
            self.set_slot(Slot::S1, self.s2);
            self.set_slot(Slot::S2, x_s1);
        } else if self.s2 == RingSlot::Dead {
            let stale = match x_s1 {
                RingSlot::Dead => true,
                RingSlot::Id(id) => self.last_dead == Some(id),
            };
            if stale {
                self.set_slot(Slot::S2, x_s2);
            } else {
                self.set_slot(Slot::S2, x_s1);
            }
        }
    }
}
