//! In-process publish/subscribe bus connecting the simulation actors.
//!
//! Every actor owns one [`Inbox`]. Topic subscriptions and direct sends both
//! land in that inbox, so a single actor sees one ordered stream of messages.

pub mod message;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, trace};

pub use message::{ActorId, CfpKind, Envelope, Ontology};

type Mailbox = UnboundedSender<Envelope>;

#[derive(Default)]
struct Registry {
    mailboxes: HashMap<ActorId, Mailbox>,
    topics: HashMap<String, Vec<ActorId>>,
}

/// Shared handle to the topic bus.
///
/// Cloning is cheap; all clones address the same registry. Publishing never
/// waits on a subscriber because mailboxes are unbounded.
#[derive(Clone, Default)]
pub struct TopicBus {
    inner: Arc<RwLock<Registry>>,
}

impl TopicBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an actor and returns its inbox.
    ///
    /// Registering an id a second time replaces the previous mailbox; the
    /// old inbox stops receiving.
    pub fn register(&self, actor: impl Into<ActorId>) -> Inbox {
        let actor = actor.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().mailboxes.insert(actor.clone(), tx);
        debug!(%actor, "actor registered");
        Inbox::new(actor, rx)
    }

    /// Subscribes a registered actor to a topic. Idempotent.
    pub fn subscribe(&self, actor: &str, topic: &str) {
        let mut reg = self.inner.write();
        let subscribers = reg.topics.entry(topic.to_string()).or_default();
        if !subscribers.iter().any(|id| id == actor) {
            subscribers.push(actor.to_string());
        }
    }

    /// Removes a subscription. Unknown pairs are ignored.
    pub fn unsubscribe(&self, actor: &str, topic: &str) {
        if let Some(subscribers) = self.inner.write().topics.get_mut(topic) {
            subscribers.retain(|id| id != actor);
        }
    }

    /// Number of actors currently subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.read().topics.get(topic).map_or(0, Vec::len)
    }

    /// Delivers `message` to every current subscriber of `topic`.
    ///
    /// Returns the number of mailboxes reached. A topic without subscribers
    /// is a no-op.
    pub fn publish(&self, topic: &str, message: Envelope) -> usize {
        let reg = self.inner.read();
        let Some(subscribers) = reg.topics.get(topic) else {
            return 0;
        };
        let mut delivered = 0;
        for id in subscribers {
            if let Some(tx) = reg.mailboxes.get(id) {
                if tx.send(message.clone()).is_ok() {
                    delivered += 1;
                } else {
                    trace!(%id, topic, "subscriber mailbox closed");
                }
            }
        }
        delivered
    }

    /// Sends `message` directly to one actor.
    ///
    /// Returns `false` if the actor is unknown or its inbox has been dropped.
    pub fn send(&self, to: &str, message: Envelope) -> bool {
        match self.inner.read().mailboxes.get(to) {
            Some(tx) => tx.send(message).is_ok(),
            None => {
                debug!(to, ontology = %message.ontology, "send to unknown actor dropped");
                false
            }
        }
    }
}

/// An actor's receiving end.
///
/// Messages pushed back with [`Inbox::defer`] are returned before anything
/// still queued in the channel, in the order they were deferred.
pub struct Inbox {
    id: ActorId,
    rx: UnboundedReceiver<Envelope>,
    deferred: VecDeque<Envelope>,
}

impl Inbox {
    fn new(id: ActorId, rx: UnboundedReceiver<Envelope>) -> Self {
        Self {
            id,
            rx,
            deferred: VecDeque::new(),
        }
    }

    /// The id this inbox was registered under.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the next message. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        if let Some(env) = self.deferred.pop_front() {
            return Some(env);
        }
        self.rx.recv().await
    }

    /// Waits for the next channel message until `deadline`.
    ///
    /// Deferred messages are not returned here; a collection loop defers
    /// what it cannot handle and picks it up after the window closes.
    pub async fn recv_until(&mut self, deadline: Instant) -> Option<Envelope> {
        tokio::time::timeout_at(deadline, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Returns a message to the front of the stream for later handling.
    pub fn defer(&mut self, env: Envelope) {
        self.deferred.push_back(env);
    }

    /// Returns an already queued message without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.deferred
            .pop_front()
            .or_else(|| self.rx.try_recv().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(n: i64) -> Envelope {
        Envelope::new("clock", Ontology::Tick, n.to_string())
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber_in_order() {
        let bus = TopicBus::new();
        let mut a = bus.register("a");
        let mut b = bus.register("b");
        bus.subscribe("a", message::TICK_TOPIC);
        bus.subscribe("b", message::TICK_TOPIC);

        for n in 0..3 {
            assert_eq!(bus.publish(message::TICK_TOPIC, tick(n)), 2);
        }
        for inbox in [&mut a, &mut b] {
            for n in 0..3 {
                assert_eq!(inbox.recv().await.unwrap().content, n.to_string());
            }
        }
    }

    #[test]
    fn subscribe_is_idempotent() {
        let bus = TopicBus::new();
        let mut inbox = bus.register("a");
        bus.subscribe("a", "T");
        bus.subscribe("a", "T");
        assert_eq!(bus.subscriber_count("T"), 1);

        assert_eq!(bus.publish("T", tick(1)), 1);
        assert!(inbox.try_recv().is_some());
        assert!(inbox.try_recv().is_none());
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let bus = TopicBus::new();
        assert_eq!(bus.publish("nobody", tick(0)), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = TopicBus::new();
        let mut inbox = bus.register("a");
        bus.subscribe("a", "T");
        bus.unsubscribe("a", "T");
        assert_eq!(bus.publish("T", tick(0)), 0);
        assert!(inbox.try_recv().is_none());
    }

    #[test]
    fn direct_send_targets_one_actor() {
        let bus = TopicBus::new();
        let mut a = bus.register("a");
        let mut b = bus.register("b");
        assert!(bus.send("b", tick(7)));
        assert!(!bus.send("missing", tick(7)));
        assert!(a.try_recv().is_none());
        assert_eq!(b.try_recv().unwrap().content, "7");
    }

    #[tokio::test(start_paused = true)]
    async fn recv_until_times_out_and_deferred_come_first() {
        let bus = TopicBus::new();
        let mut inbox = bus.register("a");
        let deadline = Instant::now() + std::time::Duration::from_millis(50);
        assert!(inbox.recv_until(deadline).await.is_none());

        bus.send("a", tick(2));
        inbox.defer(tick(1));
        assert_eq!(inbox.recv().await.unwrap().content, "1");
        assert_eq!(inbox.recv().await.unwrap().content, "2");
    }
}
