//! Reporting actors: loads, solar producers and the weather generator.
//!
//! Reports are sent directly to the aggregator, tagged with the tick they
//! belong to in the conversation field.

use tracing::{debug, trace, warn};

use crate::bus::message::{
    ActorId, Envelope, IRRADIANCE_TOPIC, Ontology, TICK_TOPIC, parse_irradiance,
};
use crate::bus::{Inbox, TopicBus};
use crate::devices::load::Load;
use crate::devices::solar::SolarArray;
use crate::devices::weather::WeatherModel;
use crate::sim::events::EventControl;
use crate::sim::registry::{AgentKind, AgentState, StateRegistry};

/// Actor id of the weather generator.
pub const WEATHER_ID: &str = "weather";

/// Extracts the tick number from a tick message.
fn tick_of(env: &Envelope) -> Option<i64> {
    env.conversation
        .or_else(|| env.content.trim().parse::<i64>().ok())
}

/// Consumer reporting `ENERGY_CONSUMPTION` every tick.
pub struct LoadActor {
    name: String,
    load: Load,
    bus: TopicBus,
    inbox: Inbox,
    events: EventControl,
    registry: StateRegistry,
    aggregator: ActorId,
}

impl LoadActor {
    pub fn new(
        name: impl Into<String>,
        load: Load,
        bus: TopicBus,
        events: EventControl,
        registry: StateRegistry,
        aggregator: impl Into<ActorId>,
    ) -> Self {
        let name = name.into();
        let inbox = bus.register(name.as_str());
        bus.subscribe(&name, TICK_TOPIC);
        registry.upsert(&name, AgentState::new(AgentKind::Load));
        Self {
            name,
            load,
            bus,
            inbox,
            events,
            registry,
            aggregator: aggregator.into(),
        }
    }

    pub async fn run(mut self) {
        while let Some(env) = self.inbox.recv().await {
            self.handle(&env);
        }
    }

    pub fn handle(&mut self, env: &Envelope) {
        if env.ontology != Ontology::Tick {
            trace!(actor = %self.name, ontology = %env.ontology, "ignored message");
            return;
        }
        let Some(tick) = tick_of(env) else {
            warn!(actor = %self.name, content = %env.content, "malformed tick dropped");
            return;
        };

        let broken = self.events.take_broken(&self.name);
        let multiplier = self.events.take_load_multiplier(&self.name);
        let demand = if broken {
            0.0
        } else {
            self.load.demand_kw(tick, multiplier)
        };

        let report =
            Envelope::new(self.name.clone(), Ontology::EnergyConsumption, demand.to_string())
                .with_conversation(tick);
        self.bus.send(&self.aggregator, report);
        self.registry.upsert(
            &self.name,
            AgentState {
                tick,
                demand_kw: demand,
                broken,
                ..AgentState::new(AgentKind::Load)
            },
        );
        debug!(actor = %self.name, tick, demand, "consumption reported");
    }
}

/// Producer reporting `ENERGY_PRODUCTION` for each weather observation.
pub struct SolarActor {
    name: String,
    array: SolarArray,
    bus: TopicBus,
    inbox: Inbox,
    events: EventControl,
    registry: StateRegistry,
    aggregator: ActorId,
    broken: bool,
}

impl SolarActor {
    pub fn new(
        name: impl Into<String>,
        array: SolarArray,
        bus: TopicBus,
        events: EventControl,
        registry: StateRegistry,
        aggregator: impl Into<ActorId>,
    ) -> Self {
        let name = name.into();
        let inbox = bus.register(name.as_str());
        bus.subscribe(&name, TICK_TOPIC);
        bus.subscribe(&name, IRRADIANCE_TOPIC);
        registry.upsert(&name, AgentState::new(AgentKind::Solar));
        Self {
            name,
            array,
            bus,
            inbox,
            events,
            registry,
            aggregator: aggregator.into(),
            broken: false,
        }
    }

    pub async fn run(mut self) {
        while let Some(env) = self.inbox.recv().await {
            self.handle(&env);
        }
    }

    pub fn handle(&mut self, env: &Envelope) {
        match env.ontology {
            // The tick arrives before its weather observation.
            Ontology::Tick => self.broken = self.events.take_broken(&self.name),
            Ontology::Irradiance => self.on_irradiance(env),
            other => trace!(actor = %self.name, ontology = %other, "ignored message"),
        }
    }

    fn on_irradiance(&mut self, env: &Envelope) {
        let obs = match parse_irradiance(&env.content) {
            Ok(obs) => obs,
            Err(e) => {
                warn!(actor = %self.name, error = %e, "malformed irradiance dropped");
                return;
            }
        };
        let tick = env.conversation.unwrap_or_default();
        let production = if self.broken {
            0.0
        } else {
            self.array.production_kw(obs)
        };

        let mut report =
            Envelope::new(self.name.clone(), Ontology::EnergyProduction, production.to_string());
        if let Some(tick) = env.conversation {
            report = report.with_conversation(tick);
        }
        self.bus.send(&self.aggregator, report);
        self.registry.upsert(
            &self.name,
            AgentState {
                tick,
                production_kw: production,
                broken: self.broken,
                ..AgentState::new(AgentKind::Solar)
            },
        );
        debug!(actor = %self.name, tick, production, "production reported");
    }
}

/// Publishes one weather observation per tick on the irradiance topic.
pub struct WeatherActor {
    model: WeatherModel,
    bus: TopicBus,
    inbox: Inbox,
    registry: StateRegistry,
}

impl WeatherActor {
    pub fn new(model: WeatherModel, bus: TopicBus, registry: StateRegistry) -> Self {
        let inbox = bus.register(WEATHER_ID);
        bus.subscribe(WEATHER_ID, TICK_TOPIC);
        registry.upsert(WEATHER_ID, AgentState::new(AgentKind::Weather));
        Self {
            model,
            bus,
            inbox,
            registry,
        }
    }

    pub async fn run(mut self) {
        while let Some(env) = self.inbox.recv().await {
            self.handle(&env);
        }
    }

    pub fn handle(&mut self, env: &Envelope) {
        if env.ontology != Ontology::Tick {
            return;
        }
        let Some(tick) = tick_of(env) else {
            warn!(actor = WEATHER_ID, content = %env.content, "malformed tick dropped");
            return;
        };
        let obs = self.model.observe(tick);
        let msg =
            Envelope::new(WEATHER_ID, Ontology::Irradiance, obs.encode()).with_conversation(tick);
        let reached = self.bus.publish(IRRADIANCE_TOPIC, msg);
        self.registry.upsert(
            WEATHER_ID,
            AgentState {
                tick,
                ..AgentState::new(AgentKind::Weather)
            },
        );
        trace!(tick, g = obs.g, t = obs.t, reached, "weather published");
    }
}
