//! Hybrid plan/react controller.
//!
//! Every tick the aggregator totals the reports for that tick, then either
//! confirms the queued plan slice with direct ACCEPTs or, when there is no
//! plan or live conditions deviate from it by more than ε, runs one CNP
//! round on the live net. Once the history buffer is full it refits the
//! forecaster and re-solves the plan on a fixed cadence.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::bus::message::{
    ActorId, CfpKind, Envelope, IRRADIANCE_TOPIC, Irradiance, Ontology, TICK_TOPIC,
    parse_irradiance, parse_kw,
};
use crate::bus::{Inbox, TopicBus};
use crate::cnp::{AMOUNT_EPSILON, Delivery, Negotiator, Order};
use crate::forecast::{Forecaster, HistoryBuffer, QuantileForecast, Sample, TrainingWindow};
use crate::planning::action::{ActionQueue, Plan, PlanSlice};
use crate::planning::planner::{ACTION_THRESHOLD, DeterministicPlanner};
use crate::planning::scenario::{ScenarioGenerator, ScenarioSelection};
use crate::sim::ledger::{ReportKind, ReportLedger};
use crate::sim::registry::{AgentKind, AgentState, FanChart, ForecastSample, StateRegistry};
use crate::sim::types::{Mode, TickSummary};

/// Actor id of the aggregator.
pub const AGGREGATOR_ID: &str = "aggregator";

/// Static controller settings for one run.
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// History buffer capacity (samples).
    pub history_len: usize,
    /// Replan every this many ticks once the buffer is full.
    pub replan_every: i64,
    /// Deviation from the planned net that aborts the plan (kW).
    pub epsilon_kw: f64,
    /// Production and consumption reports expected per tick.
    pub expected_reports: usize,
    /// How long to wait for a tick's reports.
    pub report_window: Duration,
    /// CNP proposal collection window.
    pub negotiation_window: Duration,
    pub selection: ScenarioSelection,
    /// Actor id of the external source, if any, for import accounting.
    pub external_id: Option<ActorId>,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            history_len: 48,
            replan_every: 6,
            epsilon_kw: 5.0,
            expected_reports: 0,
            report_window: Duration::from_millis(500),
            negotiation_window: crate::cnp::negotiator::DEFAULT_WINDOW,
            selection: ScenarioSelection::ClosestToMedian,
            external_id: None,
        }
    }
}

/// The aggregator actor.
pub struct Aggregator {
    settings: AggregatorSettings,
    bus: TopicBus,
    inbox: Inbox,
    negotiator: Negotiator,
    registry: StateRegistry,
    history: HistoryBuffer,
    forecaster: Box<dyn Forecaster>,
    generator: Box<dyn ScenarioGenerator>,
    planner: DeterministicPlanner,
    queue: ActionQueue,
    forecasts: VecDeque<ForecastSample>,
    ledger: ReportLedger,
    weather: Option<Irradiance>,
    summaries: UnboundedSender<TickSummary>,
}

impl Aggregator {
    /// Registers the aggregator on the bus and subscribes it to the tick and
    /// irradiance topics.
    ///
    /// # Panics
    ///
    /// Panics if `settings.history_len` is zero.
    pub fn new(
        settings: AggregatorSettings,
        bus: TopicBus,
        registry: StateRegistry,
        forecaster: Box<dyn Forecaster>,
        generator: Box<dyn ScenarioGenerator>,
        planner: DeterministicPlanner,
        summaries: UnboundedSender<TickSummary>,
    ) -> Self {
        let inbox = bus.register(AGGREGATOR_ID);
        bus.subscribe(AGGREGATOR_ID, TICK_TOPIC);
        bus.subscribe(AGGREGATOR_ID, IRRADIANCE_TOPIC);
        registry.upsert(AGGREGATOR_ID, AgentState::new(AgentKind::Aggregator));

        let negotiator =
            Negotiator::new(bus.clone(), registry.clone(), settings.negotiation_window);
        Self {
            history: HistoryBuffer::new(settings.history_len),
            ledger: ReportLedger::new(settings.expected_reports),
            settings,
            bus,
            inbox,
            negotiator,
            registry,
            forecaster,
            generator,
            planner,
            queue: ActionQueue::new(),
            forecasts: VecDeque::new(),
            weather: None,
            summaries,
        }
    }

    /// Replaces the queued plan, as a replan would.
    pub fn install_plan(&mut self, plan: Plan) {
        self.queue.replace(plan);
    }

    /// Plan slices still queued.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    /// Handles messages until the bus is dropped or nobody listens for
    /// summaries any more.
    pub async fn run(mut self) {
        while let Some(env) = self.inbox.recv().await {
            let Some(env) = self.absorb(env) else {
                continue;
            };
            if env.ontology != Ontology::Tick {
                trace!(ontology = %env.ontology, sender = %env.sender, "ignored message");
                continue;
            }
            let Some(tick) = env.conversation.or_else(|| env.content.trim().parse().ok()) else {
                warn!(content = %env.content, "malformed tick dropped");
                continue;
            };
            let summary = self.step(tick).await;
            if self.summaries.send(summary).is_err() {
                debug!("summary receiver dropped; aggregator stopping");
                break;
            }
        }
    }

    /// Records reports and weather; hands back anything else.
    fn absorb(&mut self, env: Envelope) -> Option<Envelope> {
        let kind = match env.ontology {
            Ontology::EnergyProduction => ReportKind::Production,
            Ontology::EnergyConsumption => ReportKind::Consumption,
            Ontology::Irradiance => {
                match parse_irradiance(&env.content) {
                    Ok(obs) => self.weather = Some(obs),
                    Err(e) => {
                        warn!(sender = %env.sender, error = %e, "malformed irradiance dropped")
                    }
                }
                return None;
            }
            Ontology::CnpProposal | Ontology::CnpInform => {
                debug!(
                    sender = %env.sender,
                    ontology = %env.ontology,
                    "reply after round closed dropped"
                );
                return None;
            }
            _ => return Some(env),
        };
        let Some(tick) = env.conversation else {
            warn!(sender = %env.sender, "report without tick dropped");
            return None;
        };
        match parse_kw(&env.content) {
            Ok(kw) => self.ledger.record(tick, kind, &env.sender, kw),
            Err(e) => warn!(sender = %env.sender, error = %e, "malformed report dropped"),
        }
        None
    }

    /// Waits until every expected report for `tick` is in or the report
    /// window closes. Ticks seen meanwhile are handled afterwards.
    async fn collect_reports(&mut self, tick: i64) {
        let deadline = Instant::now() + self.settings.report_window;
        let mut held = Vec::new();
        while !self.ledger.is_complete(tick) {
            let next = match self.inbox.try_recv() {
                Some(env) => Some(env),
                None => self.inbox.recv_until(deadline).await,
            };
            let Some(env) = next else {
                warn!(
                    tick,
                    expected = self.ledger.expected(),
                    "report window closed before all reports arrived"
                );
                break;
            };
            if let Some(env) = self.absorb(env) {
                held.push(env);
            }
        }
        for env in held {
            self.inbox.defer(env);
        }
    }

    /// Runs the full control cycle for one tick.
    pub async fn step(&mut self, tick: i64) -> TickSummary {
        self.collect_reports(tick).await;
        let balance = self.ledger.take(tick);
        let live_net = balance.net_kw();
        let mut summary = TickSummary::new(tick, balance.production_kw, balance.consumption_kw);

        self.expose_forecast(balance.consumption_kw, balance.production_kw);

        match self.queue.pop_slice() {
            Some(slice) if (live_net - slice.planned_net_kw).abs() > self.settings.epsilon_kw => {
                let dropped = self.queue.len();
                self.queue.clear();
                warn!(
                    tick,
                    live_net,
                    planned_net = slice.planned_net_kw,
                    epsilon = self.settings.epsilon_kw,
                    dropped,
                    "epsilon break: plan discarded"
                );
                summary.mode = Mode::EpsilonBreak;
                summary.planned_net_kw = Some(slice.planned_net_kw);
                self.negotiate(live_net, &mut summary).await;
            }
            Some(slice) => {
                summary.mode = Mode::Planned;
                summary.planned_net_kw = Some(slice.planned_net_kw);
                self.dispatch(&slice, tick, live_net, &mut summary).await;
            }
            None if live_net.abs() > AMOUNT_EPSILON => {
                summary.mode = Mode::Reactive;
                self.negotiate(live_net, &mut summary).await;
            }
            None => summary.mode = Mode::Idle,
        }

        // Every ACCEPT of this tick has settled, so the registry is current.
        let soc = self.registry.aggregate_soc();
        let weather = self.weather.unwrap_or(Irradiance { g: 0.0, t: 0.0 });
        self.history.push(Sample {
            load_kw: balance.consumption_kw,
            production_kw: balance.production_kw,
            irradiance: weather.g,
            temperature: weather.t,
            soc_kwh: soc,
        });

        self.registry.set_history(self.history.snapshot());

        if self.history.is_full() && tick.rem_euclid(self.settings.replan_every.max(1)) == 0 {
            self.replan(tick);
            summary.replanned = true;
        }

        summary.soc_kwh = soc;
        summary.queue_len = self.queue.len();
        self.registry.upsert(
            AGGREGATOR_ID,
            AgentState {
                tick,
                demand_kw: balance.consumption_kw,
                production_kw: balance.production_kw,
                soc_kwh: soc,
                ..AgentState::new(AgentKind::Aggregator)
            },
        );
        info!(%summary, "tick complete");
        summary
    }

    /// Publishes the forecast made for this tick and scores it.
    fn expose_forecast(&mut self, observed_load: f64, observed_production: f64) {
        let sample = self.forecasts.pop_front();
        if let Some(s) = &sample {
            self.registry.record_error(s, observed_load, observed_production);
        }
        self.registry.set_forecast(sample);
    }

    /// One CNP round on the live net. Only settled amounts are booked.
    async fn negotiate(&mut self, live_net: f64, summary: &mut TickSummary) {
        let kind = if live_net < 0.0 {
            CfpKind::Shortfall
        } else {
            CfpKind::Surplus
        };
        let outcome = self
            .negotiator
            .run(&mut self.inbox, kind, live_net.abs())
            .await;
        summary.negotiations = 1;
        self.book(&outcome.deliveries, summary);

        let short = (outcome.accepted() - outcome.delivered()).max(0.0);
        if short > AMOUNT_EPSILON {
            warn!(round = outcome.round, short, "winners delivered less than awarded");
        }
        let uncovered = outcome.requested - outcome.delivered();
        if uncovered > AMOUNT_EPSILON {
            match kind {
                CfpKind::Shortfall => summary.unmet_kw = uncovered,
                CfpKind::Surplus => summary.wasted_kw = uncovered,
            }
        }
    }

    /// Confirms a plan slice with direct ACCEPTs and books what the targets
    /// report delivering. No CFP is issued, so no REJECTs are sent.
    ///
    /// A target that falls short (drained, full or broken) leaves the gap
    /// in the residual as unmet or wasted energy.
    async fn dispatch(
        &mut self,
        slice: &PlanSlice,
        tick: i64,
        live_net: f64,
        summary: &mut TickSummary,
    ) {
        let mut orders = Vec::with_capacity(slice.actions.len());
        for action in &slice.actions {
            let (kind, amount) = if action.charge_kw > ACTION_THRESHOLD {
                (CfpKind::Surplus, action.charge_kw)
            } else if action.charge_kw < -ACTION_THRESHOLD {
                (CfpKind::Shortfall, -action.charge_kw)
            } else if action.import_kw > ACTION_THRESHOLD {
                (CfpKind::Shortfall, action.import_kw)
            } else {
                if action.import_kw < -ACTION_THRESHOLD {
                    summary.export_kw += -action.import_kw;
                }
                continue;
            };
            debug!(tick, %action, "planned action dispatched");
            orders.push(Order {
                target: action.target.clone(),
                kind,
                amount,
            });
        }

        let deliveries = self.negotiator.dispatch(&mut self.inbox, &orders).await;
        for d in deliveries.iter().filter(|d| d.requested - d.delivered > AMOUNT_EPSILON) {
            warn!(
                tick,
                target = %d.sender,
                planned = d.requested,
                delivered = d.delivered,
                "planned action only partly honoured"
            );
        }
        self.book(&deliveries, summary);

        let residual = live_net + summary.import_kw - summary.export_kw + summary.discharge_kw
            - summary.charge_kw;
        if residual < -AMOUNT_EPSILON {
            summary.unmet_kw = -residual;
        } else if residual > AMOUNT_EPSILON {
            summary.wasted_kw = residual;
        }
    }

    /// Adds settled deliveries to the summary's flow totals.
    fn book(&self, deliveries: &[Delivery], summary: &mut TickSummary) {
        for d in deliveries {
            match d.kind {
                CfpKind::Surplus => summary.charge_kw += d.delivered,
                CfpKind::Shortfall
                    if self.settings.external_id.as_deref() == Some(d.sender.as_str()) =>
                {
                    summary.import_kw += d.delivered
                }
                CfpKind::Shortfall => summary.discharge_kw += d.delivered,
            }
        }
    }

    /// Refit, predict, generate scenarios, solve and replace the queue.
    fn replan(&mut self, tick: i64) {
        let load = self.history.load();
        let production = self.history.production();
        let temperature = self.history.temperature();
        let window = TrainingWindow::from_history(&load, &production, &temperature, tick);
        if let Err(e) = self.forecaster.update(&window) {
            info!(tick, error = %e, "forecaster refit skipped");
        }

        let load_q = self.forecaster.predict_load();
        let production_q = self.forecaster.predict_production();
        self.forecasts = forecast_samples(tick, &load_q, &production_q);
        self.registry.set_fan_chart(FanChart {
            issued_at: tick,
            load: load_q.clone(),
            production: production_q.clone(),
        });

        let scenarios = self.generator.generate(&load_q, &production_q);
        let chosen = self.settings.selection.select(&scenarios, &load_q, &production_q);
        let Some(scenario) = chosen else {
            warn!(tick, "no scenarios generated; running reactively");
            self.queue.clear();
            return;
        };
        let initial: Vec<f64> = self
            .planner
            .storages()
            .iter()
            .map(|st| self.registry.agent(&st.id).map_or(0.0, |a| a.soc_kwh))
            .collect();
        let plan = self.planner.plan(scenario, &initial);
        if plan.is_empty() {
            warn!(tick, "empty plan; running reactively");
        } else {
            info!(tick, slices = plan.slices.len(), actions = plan.action_count(), "replanned");
        }
        self.queue.replace(plan);
    }
}

/// Per-tick forecast samples for the ticks after `tick`.
fn forecast_samples(
    tick: i64,
    load: &QuantileForecast,
    production: &QuantileForecast,
) -> VecDeque<ForecastSample> {
    (0..load.horizon().min(production.horizon()))
        .map(|k| ForecastSample {
            tick: tick + 1 + k as i64,
            load_q05: load.q05[k],
            load_q50: load.q50[k],
            load_q95: load.q95[k],
            production_q05: production.q05[k],
            production_q50: production.q50[k],
            production_q95: production.q95[k],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::message::{encode_inform, parse_accept};
    use crate::forecast::PersistenceForecaster;
    use crate::planning::action::Action;
    use crate::planning::planner::StorageSpec;
    use crate::planning::scenario::QuantileTree;
    use tokio::sync::mpsc;

    fn aggregator(
        bus: &TopicBus,
        settings: AggregatorSettings,
    ) -> (Aggregator, mpsc::UnboundedReceiver<TickSummary>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let storage = StorageSpec {
            id: "bess".into(),
            capacity_kwh: 100.0,
            eta_charge: 1.0,
            eta_discharge: 1.0,
            c_rate: 0.5,
        };
        let agg = Aggregator::new(
            settings,
            bus.clone(),
            StateRegistry::new(),
            Box::new(PersistenceForecaster::new(4, 24)),
            Box::new(QuantileTree),
            DeterministicPlanner::new(vec![storage], "grid", 50.0),
            tx,
        );
        (agg, rx)
    }

    fn report(bus: &TopicBus, sender: &str, ontology: Ontology, kw: f64, tick: i64) {
        bus.send(
            AGGREGATOR_ID,
            Envelope::new(sender, ontology, kw.to_string()).with_conversation(tick),
        );
    }

    fn slice(planned_net: f64, charge: f64) -> PlanSlice {
        PlanSlice {
            tick_offset: 0,
            planned_net_kw: planned_net,
            actions: vec![Action {
                tick_offset: 0,
                target: "bess".into(),
                charge_kw: charge,
                import_kw: 0.0,
            }],
        }
    }

    fn settings(expected: usize) -> AggregatorSettings {
        AggregatorSettings {
            history_len: 4,
            replan_every: 1000,
            epsilon_kw: 5.0,
            expected_reports: expected,
            ..AggregatorSettings::default()
        }
    }

    /// Answers the first message with an inform for `delivered` and hands
    /// back that message and the inbox.
    fn settle_once(
        bus: &TopicBus,
        id: &str,
        delivered: f64,
    ) -> tokio::task::JoinHandle<(Envelope, Inbox)> {
        let mut inbox = bus.register(id);
        let bus = bus.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let env = inbox.recv().await.unwrap();
            let inform = Envelope::new(id, Ontology::CnpInform, encode_inform(delivered))
                .with_conversation(env.conversation.unwrap());
            bus.send(&env.sender, inform);
            (env, inbox)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn planned_slice_is_confirmed_with_direct_accept() {
        let bus = TopicBus::new();
        let bess = settle_once(&bus, "bess", 20.0);
        let (mut agg, _rx) = aggregator(&bus, settings(2));
        agg.install_plan(Plan {
            slices: vec![slice(20.0, 20.0)],
        });

        report(&bus, "pv", Ontology::EnergyProduction, 100.0, 1);
        report(&bus, "load", Ontology::EnergyConsumption, 78.0, 1);
        let summary = agg.step(1).await;

        assert_eq!(summary.mode, Mode::Planned);
        assert_eq!(summary.negotiations, 0);
        assert_eq!(summary.charge_kw, 20.0);
        assert!((summary.wasted_kw - 2.0).abs() < 1e-9);
        let (accept, mut bess) = bess.await.unwrap();
        assert_eq!(accept.ontology, Ontology::CnpAccept);
        assert_eq!(accept.in_reply_to, Some(Ontology::CnpSurplus));
        assert_eq!(parse_accept(&accept.content), Ok(20.0));
        assert!(bess.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn short_delivery_on_plan_is_booked_as_unmet() {
        let bus = TopicBus::new();
        let bess = settle_once(&bus, "bess", 4.0);
        let (mut agg, _rx) = aggregator(&bus, settings(2));
        agg.install_plan(Plan {
            slices: vec![slice(-20.0, -20.0)],
        });

        report(&bus, "pv", Ontology::EnergyProduction, 0.0, 1);
        report(&bus, "load", Ontology::EnergyConsumption, 20.0, 1);
        let summary = agg.step(1).await;

        assert_eq!(summary.mode, Mode::Planned);
        assert_eq!(summary.discharge_kw, 4.0);
        assert!((summary.unmet_kw - 16.0).abs() < 1e-9);
        let (accept, _) = bess.await.unwrap();
        assert_eq!(accept.in_reply_to, Some(Ontology::CnpShortfall));
    }

    #[tokio::test(start_paused = true)]
    async fn history_snapshot_is_published_each_tick() {
        let bus = TopicBus::new();
        let (mut agg, _rx) = aggregator(&bus, settings(2));
        for tick in 1..=2 {
            report(&bus, "pv", Ontology::EnergyProduction, 5.0 * tick as f64, tick);
            report(&bus, "load", Ontology::EnergyConsumption, 5.0 * tick as f64, tick);
            agg.step(tick).await;
        }
        let history = agg.registry.history().unwrap();
        assert_eq!(history.production, vec![5.0, 10.0]);
        assert_eq!(history.load, vec![5.0, 10.0]);
        assert_eq!(history.soc, vec![0.0, 0.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn deviation_beyond_epsilon_breaks_plan() {
        let bus = TopicBus::new();
        let mut bess = bus.register("bess");
        bus.subscribe("bess", CfpKind::Shortfall.topic());
        let (mut agg, _rx) = aggregator(&bus, settings(2));
        agg.install_plan(Plan {
            slices: vec![slice(20.0, 20.0), slice(20.0, 20.0)],
        });

        report(&bus, "pv", Ontology::EnergyProduction, 10.0, 1);
        report(&bus, "load", Ontology::EnergyConsumption, 40.0, 1);
        let summary = agg.step(1).await;

        assert_eq!(summary.mode, Mode::EpsilonBreak);
        assert_eq!(summary.negotiations, 1);
        assert_eq!(agg.queue_len(), 0);
        assert_eq!(agg.registry.negotiations(), 1);
        // A CFP, never a planned ACCEPT.
        let first = bess.try_recv().unwrap();
        assert_eq!(first.ontology, Ontology::CnpShortfall);
        assert_eq!(parse_kw(&first.content), Ok(30.0));
        assert!(bess.try_recv().is_none());
        assert_eq!(summary.unmet_kw, 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn balanced_tick_without_plan_is_idle() {
        let bus = TopicBus::new();
        let (mut agg, _rx) = aggregator(&bus, settings(2));
        report(&bus, "pv", Ontology::EnergyProduction, 50.0, 3);
        report(&bus, "load", Ontology::EnergyConsumption, 50.0, 3);
        let summary = agg.step(3).await;
        assert_eq!(summary.mode, Mode::Idle);
        assert_eq!(agg.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_reports_do_not_block_the_tick() {
        let bus = TopicBus::new();
        let (mut agg, _rx) = aggregator(&bus, settings(2));
        report(&bus, "load", Ontology::EnergyConsumption, 10.0, 1);

        let started = Instant::now();
        let summary = agg.step(1).await;
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(summary.consumption_kw, 10.0);
        assert_eq!(summary.mode, Mode::Reactive);
    }

    #[tokio::test(start_paused = true)]
    async fn replans_once_history_is_full() {
        let bus = TopicBus::new();
        let (mut agg, _rx) = aggregator(
            &bus,
            AggregatorSettings {
                replan_every: 1,
                ..settings(2)
            },
        );
        for tick in 1..=4 {
            report(&bus, "pv", Ontology::EnergyProduction, 30.0, tick);
            report(&bus, "load", Ontology::EnergyConsumption, 30.0, tick);
            let summary = agg.step(tick).await;
            assert_eq!(summary.replanned, tick == 4);
        }
        assert_eq!(agg.queue_len(), 4);
        assert!(agg.registry.fan_chart().is_some());

        report(&bus, "pv", Ontology::EnergyProduction, 30.0, 5);
        report(&bus, "load", Ontology::EnergyConsumption, 30.0, 5);
        let summary = agg.step(5).await;
        assert_eq!(summary.mode, Mode::Planned);
        assert_eq!(agg.registry.forecast().map(|f| f.tick), Some(5));
        assert_eq!(agg.registry.rmse().samples, 1);
    }
}
