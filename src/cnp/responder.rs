use tracing::{debug, warn};

use super::AMOUNT_EPSILON;
use crate::bus::message::{
    CNP_SHORTFALL_TOPIC, CNP_SURPLUS_TOPIC, CfpKind, Envelope, Ontology, TICK_TOPIC, encode_inform,
    parse_accept, parse_kw,
};
use crate::bus::{Inbox, TopicBus};
use crate::devices::battery::Battery;
use crate::devices::external::ExternalSource;
use crate::devices::types::{NegotiationResponder, Tickable};
use crate::sim::events::EventControl;
use crate::sim::registry::{AgentKind, AgentState, StateRegistry};

/// A resource model that can be hosted by a [`ResponderActor`].
pub trait Resource: NegotiationResponder + Tickable + Send + 'static {
    /// Snapshot published to the state registry.
    fn state(&self, tick: i64) -> AgentState;

    /// Whether the resource takes part in rounds of this direction.
    fn bids_on(&self, _kind: CfpKind) -> bool {
        true
    }

    /// Consumes this tick's share of any scheduled events.
    fn apply_events(&mut self, name: &str, events: &EventControl) {
        self.set_broken(events.take_broken(name));
    }
}

impl Resource for Battery {
    fn state(&self, tick: i64) -> AgentState {
        AgentState {
            tick,
            soc_kwh: self.soc_kwh,
            capacity_kwh: self.capacity_kwh,
            broken: self.is_broken(),
            ..AgentState::new(AgentKind::Battery)
        }
    }
}

impl Resource for ExternalSource {
    fn state(&self, tick: i64) -> AgentState {
        AgentState {
            tick,
            production_kw: self.supplied_this_tick(),
            broken: self.is_broken() || self.in_blackout(),
            ..AgentState::new(AgentKind::External)
        }
    }

    fn bids_on(&self, kind: CfpKind) -> bool {
        kind == CfpKind::Shortfall
    }

    fn apply_events(&mut self, name: &str, events: &EventControl) {
        self.set_broken(events.take_broken(name));
        self.set_blackout(events.take_blackout());
    }
}

/// Actor hosting one negotiating resource.
///
/// The resource's private state is only touched from this actor's task, in
/// response to messages addressed to it.
pub struct ResponderActor<R> {
    name: String,
    resource: R,
    bus: TopicBus,
    inbox: Inbox,
    events: EventControl,
    registry: StateRegistry,
    tick: i64,
}

impl<R: Resource> ResponderActor<R> {
    /// Registers the actor on the bus and subscribes it to the tick topic and
    /// the CFP topics it bids on.
    pub fn new(
        name: impl Into<String>,
        resource: R,
        bus: TopicBus,
        events: EventControl,
        registry: StateRegistry,
    ) -> Self {
        let name = name.into();
        let inbox = bus.register(name.as_str());
        bus.subscribe(&name, TICK_TOPIC);
        if resource.bids_on(CfpKind::Shortfall) {
            bus.subscribe(&name, CNP_SHORTFALL_TOPIC);
        }
        if resource.bids_on(CfpKind::Surplus) {
            bus.subscribe(&name, CNP_SURPLUS_TOPIC);
        }
        registry.upsert(&name, resource.state(0));
        Self {
            name,
            resource,
            bus,
            inbox,
            events,
            registry,
            tick: 0,
        }
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// Handles messages until the bus is dropped.
    pub async fn run(mut self) {
        while let Some(env) = self.inbox.recv().await {
            self.handle(env);
        }
        debug!(actor = %self.name, "responder stopped");
    }

    /// Processes one inbound message.
    pub fn handle(&mut self, env: Envelope) {
        match env.ontology {
            Ontology::Tick => self.on_tick(&env),
            Ontology::CnpShortfall | Ontology::CnpSurplus => self.on_cfp(env),
            Ontology::CnpAccept => self.on_accept(&env),
            Ontology::CnpReject => {
                if let Some(kind) = env.in_reply_to.and_then(CfpKind::from_ontology) {
                    self.resource.reject(kind);
                }
            }
            other => debug!(actor = %self.name, ontology = %other, "ignored message"),
        }
    }

    fn on_tick(&mut self, env: &Envelope) {
        let tick = match env.conversation {
            Some(tick) => tick,
            None => match parse_kw(&env.content) {
                Ok(v) => v as i64,
                Err(e) => {
                    warn!(actor = %self.name, error = %e, "malformed tick dropped");
                    return;
                }
            },
        };
        self.tick = tick;
        self.resource.on_tick(tick);
        self.resource.apply_events(&self.name, &self.events);
        self.publish_state();
    }

    fn on_cfp(&mut self, env: Envelope) {
        let Some(kind) = CfpKind::from_ontology(env.ontology) else {
            return;
        };
        let requested = match parse_kw(&env.content) {
            Ok(v) => v,
            Err(e) => {
                warn!(actor = %self.name, error = %e, "malformed cfp dropped");
                return;
            }
        };
        let Some(offer) = self.resource.offer(kind, requested) else {
            debug!(actor = %self.name, ?kind, "not bidding");
            return;
        };
        let mut reply = Envelope::new(self.name.clone(), Ontology::CnpProposal, offer.encode())
            .in_reply_to(env.ontology);
        if let Some(round) = env.conversation {
            reply = reply.with_conversation(round);
        }
        self.bus.send(&env.sender, reply);
    }

    fn on_accept(&mut self, env: &Envelope) {
        let Some(kind) = env.in_reply_to.and_then(CfpKind::from_ontology) else {
            warn!(actor = %self.name, "accept without cfp context dropped");
            return;
        };
        let amount = match parse_accept(&env.content) {
            Ok(v) => v,
            Err(e) => {
                warn!(actor = %self.name, error = %e, "malformed accept dropped");
                return;
            }
        };
        let applied = self.resource.accept(kind, amount);
        if applied + AMOUNT_EPSILON < amount {
            debug!(actor = %self.name, ?kind, amount, applied, "accept only partly applied");
        }
        // Registry first, so the initiator sees settled state once informed.
        self.publish_state();
        let mut inform =
            Envelope::new(self.name.clone(), Ontology::CnpInform, encode_inform(applied))
                .in_reply_to(kind.ontology());
        if let Some(conversation) = env.conversation {
            inform = inform.with_conversation(conversation);
        }
        self.bus.send(&env.sender, inform);
    }

    fn publish_state(&self) {
        self.registry.upsert(&self.name, self.resource.state(self.tick));
    }
}
