use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{AMOUNT_EPSILON, Award, Proposal, clear};
use crate::bus::message::{
    ActorId, CfpKind, Envelope, Ontology, REJECT_REASON, encode_accept, parse_inform, parse_offer,
};
use crate::bus::{Inbox, TopicBus};
use crate::sim::registry::StateRegistry;

/// Default proposal collection window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(500);

/// A direct ACCEPT issued without a call for proposals.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub target: ActorId,
    pub kind: CfpKind,
    pub amount: f64,
}

/// What one resource reported doing with an ACCEPT.
///
/// `delivered` stays zero when no report arrives inside the window.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub sender: ActorId,
    pub kind: CfpKind,
    /// Amount the ACCEPT asked for.
    pub requested: f64,
    pub delivered: f64,
}

/// What one negotiation round settled.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationOutcome {
    pub round: i64,
    pub kind: CfpKind,
    pub requested: f64,
    /// Number of valid proposals received inside the window.
    pub proposals: usize,
    pub awards: Vec<Award>,
    pub rejected: Vec<ActorId>,
    /// Requested amount no proposal covered.
    pub unmet: f64,
    /// Settlement reports for the awards, in award order.
    pub deliveries: Vec<Delivery>,
}

impl NegotiationOutcome {
    /// Total awarded amount.
    pub fn accepted(&self) -> f64 {
        self.awards.iter().map(|a| a.amount).sum()
    }

    /// Total amount the winners reported as delivered.
    pub fn delivered(&self) -> f64 {
        self.deliveries.iter().map(|d| d.delivered).sum()
    }
}

/// Initiator side of the contract-net protocol.
///
/// Runs inside the aggregator and borrows its inbox for the duration of a
/// round. Messages unrelated to the round are deferred so the aggregator sees
/// them afterwards.
pub struct Negotiator {
    bus: TopicBus,
    registry: StateRegistry,
    window: Duration,
    next_round: i64,
}

impl Negotiator {
    pub fn new(bus: TopicBus, registry: StateRegistry, window: Duration) -> Self {
        Self {
            bus,
            registry,
            window,
            next_round: 1,
        }
    }

    fn open_round(&mut self) -> i64 {
        let round = self.next_round;
        self.next_round += 1;
        round
    }

    /// Runs one full round for `requested` (positive magnitude).
    ///
    /// Collection ends when the window expires or every subscriber of the
    /// CFP topic has answered. Late proposals are discarded. After the
    /// ACCEPTs go out the round waits, again bounded by the window, for each
    /// winner's settlement report.
    pub async fn run(
        &mut self,
        inbox: &mut Inbox,
        kind: CfpKind,
        requested: f64,
    ) -> NegotiationOutcome {
        let round = self.open_round();
        self.registry.count_negotiation();

        let me = inbox.id().to_string();
        let cfp = Envelope::new(me.clone(), kind.ontology(), requested.to_string())
            .with_conversation(round);
        let expected = self.bus.publish(kind.topic(), cfp);
        debug!(round, ?kind, requested, expected, "cfp published");

        let proposals = self.collect(inbox, kind, round, expected).await;
        let received = proposals.len();
        let clearing = clear(requested, proposals);

        let mut deliveries = Vec::with_capacity(clearing.awards.len());
        let mut open = Vec::with_capacity(clearing.awards.len());
        for award in &clearing.awards {
            let accept = Envelope::new(me.clone(), Ontology::CnpAccept, encode_accept(award.amount))
                .in_reply_to(kind.ontology())
                .with_conversation(round);
            if self.bus.send(&award.sender, accept) {
                open.push(deliveries.len());
            }
            deliveries.push(Delivery {
                sender: award.sender.clone(),
                kind,
                requested: award.amount,
                delivered: 0.0,
            });
        }
        for loser in &clearing.rejected {
            let reject = Envelope::new(me.clone(), Ontology::CnpReject, REJECT_REASON)
                .in_reply_to(kind.ontology())
                .with_conversation(round);
            self.bus.send(loser, reject);
        }

        if clearing.unmet > AMOUNT_EPSILON {
            match kind {
                CfpKind::Shortfall => {
                    warn!(round, requested, unmet = clearing.unmet, "partial blackout")
                }
                CfpKind::Surplus => {
                    warn!(round, requested, unmet = clearing.unmet, "surplus wasted")
                }
            }
        } else {
            info!(round, ?kind, requested, winners = clearing.awards.len(), "round cleared");
        }

        let deliveries = self.settle(inbox, round, deliveries, open).await;
        NegotiationOutcome {
            round,
            kind,
            requested,
            proposals: received,
            awards: clearing.awards,
            rejected: clearing.rejected,
            unmet: clearing.unmet,
            deliveries,
        }
    }

    /// Sends ACCEPTs for pre-agreed orders and waits for their settlement.
    ///
    /// No CFP is published and no REJECT is sent. Orders to unknown actors
    /// settle at zero.
    pub async fn dispatch(&mut self, inbox: &mut Inbox, orders: &[Order]) -> Vec<Delivery> {
        let round = self.open_round();
        let me = inbox.id().to_string();
        let mut deliveries = Vec::with_capacity(orders.len());
        let mut open = Vec::with_capacity(orders.len());
        for order in orders {
            let accept = Envelope::new(me.clone(), Ontology::CnpAccept, encode_accept(order.amount))
                .in_reply_to(order.kind.ontology())
                .with_conversation(round);
            if self.bus.send(&order.target, accept) {
                open.push(deliveries.len());
            } else {
                warn!(target = %order.target, "dispatch target unknown");
            }
            deliveries.push(Delivery {
                sender: order.target.clone(),
                kind: order.kind,
                requested: order.amount,
                delivered: 0.0,
            });
        }
        self.settle(inbox, round, deliveries, open).await
    }

    /// Fills in `delivered` from CNP_INFORM replies for `round`, waiting
    /// only on the entries indexed by `open`.
    async fn settle(
        &self,
        inbox: &mut Inbox,
        round: i64,
        mut deliveries: Vec<Delivery>,
        mut open: Vec<usize>,
    ) -> Vec<Delivery> {
        let deadline = Instant::now() + self.window;

        while !open.is_empty() {
            let Some(env) = inbox.recv_until(deadline).await else {
                break;
            };
            if env.ontology != Ontology::CnpInform {
                inbox.defer(env);
                continue;
            }
            let slot = if env.conversation == Some(round) {
                open.iter().position(|&i| deliveries[i].sender == env.sender)
            } else {
                None
            };
            let Some(slot) = slot else {
                debug!(
                    sender = %env.sender,
                    conversation = ?env.conversation,
                    round,
                    "stale inform dropped"
                );
                continue;
            };
            let i = open.remove(slot);
            match parse_inform(&env.content) {
                Ok(v) => deliveries[i].delivered = v.clamp(0.0, deliveries[i].requested),
                Err(e) => warn!(sender = %env.sender, error = %e, "malformed inform dropped"),
            }
        }

        for &i in &open {
            let d = &deliveries[i];
            warn!(
                round,
                sender = %d.sender,
                requested = d.requested,
                "no settlement report; counted as undelivered"
            );
        }
        deliveries
    }

    async fn collect(
        &self,
        inbox: &mut Inbox,
        kind: CfpKind,
        round: i64,
        expected: usize,
    ) -> Vec<Proposal> {
        let deadline = Instant::now() + self.window;
        let mut proposals = Vec::new();
        let mut answered = 0;

        while answered < expected {
            let Some(env) = inbox.recv_until(deadline).await else {
                break;
            };
            if env.ontology != Ontology::CnpProposal {
                inbox.defer(env);
                continue;
            }
            if env.in_reply_to != Some(kind.ontology()) || env.conversation != Some(round) {
                debug!(
                    sender = %env.sender,
                    conversation = ?env.conversation,
                    round,
                    "stale proposal dropped"
                );
                continue;
            }
            answered += 1;
            match parse_offer(&env.content) {
                Ok(offer) if offer.kind == kind => proposals.push(Proposal {
                    sender: env.sender,
                    amount: offer.amount,
                    cost: offer.cost,
                    arrival: proposals.len(),
                }),
                Ok(offer) => {
                    warn!(
                        sender = %env.sender,
                        kind = ?offer.kind,
                        "proposal for the wrong direction dropped"
                    )
                }
                Err(e) => warn!(sender = %env.sender, error = %e, "malformed proposal dropped"),
            }
        }

        if answered < expected {
            debug!(round, answered, expected, "collection window expired");
        }
        proposals
    }
}
