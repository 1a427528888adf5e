//! Contract-net negotiation: ranking and clearing of proposals, the
//! initiator round and the responder actor.

pub mod negotiator;
pub mod responder;

use std::cmp::Ordering;

use serde::Serialize;

use crate::bus::message::ActorId;

pub use negotiator::{Delivery, NegotiationOutcome, Negotiator, Order};
pub use responder::{Resource, ResponderActor};

/// Amounts below this are treated as zero when clearing.
pub const AMOUNT_EPSILON: f64 = 1e-9;

/// One decoded reply to a call for proposals.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub sender: ActorId,
    /// Offered amount (kWh for the tick).
    pub amount: f64,
    pub cost: f64,
    /// Position in arrival order within the round.
    pub arrival: usize,
}

/// Accepted share of one proposal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Award {
    pub sender: ActorId,
    pub amount: f64,
    pub cost: f64,
}

/// Result of clearing a round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clearing {
    pub awards: Vec<Award>,
    pub rejected: Vec<ActorId>,
    /// Requested amount left uncovered.
    pub unmet: f64,
}

impl Clearing {
    /// Total accepted amount.
    pub fn accepted(&self) -> f64 {
        self.awards.iter().map(|a| a.amount).sum()
    }
}

/// Cheapest first, then larger offers, then earlier arrivals.
fn compare(a: &Proposal, b: &Proposal) -> Ordering {
    a.cost
        .total_cmp(&b.cost)
        .then_with(|| b.amount.total_cmp(&a.amount))
        .then_with(|| a.arrival.cmp(&b.arrival))
}

/// Sorts proposals into acceptance order.
pub fn rank(proposals: &mut [Proposal]) {
    proposals.sort_by(compare);
}

/// Greedily fills `requested` from the ranked proposals.
///
/// Each proposal is accepted for `min(remaining, offered)`; proposals that
/// get nothing, including zero or negative offers, are rejected.
///
/// # Examples
///
/// ```
/// use microgrid_twin::cnp::{Proposal, clear};
///
/// let offer = |sender: &str, amount, cost, arrival| Proposal {
///     sender: sender.to_string(),
///     amount,
///     cost,
///     arrival,
/// };
/// let result = clear(10.0, vec![offer("b1", 4.0, 1.0, 0)]);
/// assert_eq!(result.accepted(), 4.0);
/// assert_eq!(result.unmet, 6.0);
/// ```
pub fn clear(requested: f64, mut proposals: Vec<Proposal>) -> Clearing {
    rank(&mut proposals);
    let mut remaining = requested.max(0.0);
    let mut clearing = Clearing::default();

    for p in proposals {
        let take = remaining.min(p.amount);
        if remaining > AMOUNT_EPSILON && take > AMOUNT_EPSILON {
            remaining -= take;
            clearing.awards.push(Award {
                sender: p.sender,
                amount: take,
                cost: p.cost,
            });
        } else {
            clearing.rejected.push(p.sender);
        }
    }

    clearing.unmet = if remaining > AMOUNT_EPSILON { remaining } else { 0.0 };
    clearing
}
