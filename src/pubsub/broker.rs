use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    fmt,
    rc::Rc,
};

use tracing::{debug, trace};

use super::{
    events::Notifications, filter::FilterCompiler, trie::TrieNode, BrokerEvent, BrokerListener,
    CompilerKind, EventKind, ListenerId, MessageBus, MessageListener, Meta, Payload,
    PredicateOnly, Sandbox, Subscription, SubscriptionId, Topic,
};
use crate::{config::BrokerConfig, error::PubSubResult};

struct BrokerInner {
    root: RefCell<Rc<TrieNode>>,
    events: Rc<Notifications>,
    next_id: Cell<u64>,
    compiler: Rc<dyn FilterCompiler>,
}

/// Брокер сообщений: дерево подписок, выдача идентификаторов и
/// уведомления.
///
/// Клонирование дёшево, все клоны работают с одним брокером.
#[derive(Clone)]
pub struct Broker(Rc<BrokerInner>);

impl Broker {
    pub fn new() -> Self {
        Self::with_compiler(Rc::new(PredicateOnly))
    }

    /// Брокер с заданной стратегией компиляции дескрипторов фильтров.
    pub fn with_compiler(compiler: Rc<dyn FilterCompiler>) -> Self {
        let events = Rc::new(Notifications::new());
        Self(Rc::new(BrokerInner {
            root: RefCell::new(TrieNode::root(Rc::clone(&events))),
            events,
            next_id: Cell::new(0),
            compiler,
        }))
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        debug!("Creating broker with {:?} filter compiler", config.filter_compiler);
        Self::with_compiler(config.filter_compiler.build())
    }

    pub fn compiler_name(&self) -> &'static str {
        self.0.compiler.name()
    }

    /// Вызывает слушателей уведомления напрямую.
    pub fn emit(
        &self,
        event: &BrokerEvent<'_>,
    ) {
        self.0.events.emit(event);
    }

    pub fn listener_count(
        &self,
        kind: EventKind,
    ) -> usize {
        self.0.events.listener_count(kind)
    }

    fn root(&self) -> Rc<TrieNode> {
        Rc::clone(&self.0.root.borrow())
    }

    fn next_id(&self) -> SubscriptionId {
        let id = self.0.next_id.get() + 1;
        self.0.next_id.set(id);
        SubscriptionId(id)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl From<CompilerKind> for Broker {
    fn from(kind: CompilerKind) -> Self {
        Self::with_compiler(kind.build())
    }
}

impl MessageBus for Broker {
    fn publish_with_meta(
        &self,
        topic: &str,
        message: Payload,
        meta: Meta,
    ) -> PubSubResult<()> {
        let parsed = Topic::parse(topic)?;
        trace!("Publishing to {:?}", topic);
        self.0.events.emit(&BrokerEvent::Message {
            topic,
            message: &message,
            meta: &meta,
        });
        self.root()
            .dispatch(parsed.segments(), topic, &message, &meta);
        Ok(())
    }

    fn subscribe_with(
        &self,
        topic: &str,
        on_message: Option<MessageListener>,
    ) -> PubSubResult<Subscription> {
        let parsed = Topic::parse(topic)?;
        let sub = Subscription::new(self.next_id(), parsed, Rc::clone(&self.0.compiler));
        if let Some(listener) = on_message {
            sub.on_message_listener(listener);
        }

        let root = self.root();
        root.insert(sub.parsed_topic().segments(), sub.clone());
        debug!("Subscription {} created on {:?}", sub.id(), topic);
        self.0.events.emit(&BrokerEvent::Subscribe(&sub));
        Ok(sub)
    }

    fn unsubscribe(
        &self,
        topic: &str,
    ) -> PubSubResult<()> {
        let parsed = Topic::parse(topic)?;
        debug!("Unsubscribing everything on {:?}", topic);
        self.root().remove_exact(parsed.segments());
        Ok(())
    }

    fn count(&self) -> PubSubResult<BTreeMap<String, usize>> {
        let mut out = BTreeMap::new();
        self.root().count(&mut out);
        Ok(out)
    }

    fn count_all(&self) -> PubSubResult<BTreeMap<String, usize>> {
        self.count()
    }

    fn on(
        &self,
        kind: EventKind,
        listener: BrokerListener,
    ) -> PubSubResult<ListenerId> {
        Ok(self.0.events.add(kind, listener))
    }

    fn off(
        &self,
        kind: EventKind,
        id: ListenerId,
    ) -> PubSubResult<bool> {
        Ok(self.0.events.remove(kind, id))
    }

    fn sandbox(&self) -> PubSubResult<Sandbox> {
        Ok(Sandbox::new(Rc::new(self.clone())))
    }

    /// Отменяет все подписки и снимает всех слушателей уведомлений.
    ///
    /// Брокер остаётся пригодным: дерево заменяется пустым, идентификаторы
    /// продолжают расти.
    fn destroy(&self) {
        let fresh = TrieNode::root(Rc::clone(&self.0.events));
        let old = self.0.root.replace(fresh);
        debug!("Destroying broker");
        old.destroy();
        self.0.events.clear();
    }
}

impl fmt::Debug for Broker {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Broker")
            .field("next_id", &self.0.next_id.get())
            .field("compiler", &self.0.compiler.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_ids_are_monotonic_across_destroy() {
        let broker = Broker::new();
        let a = broker.subscribe("a").unwrap();
        let b = broker.subscribe("b").unwrap();
        broker.destroy();
        let c = broker.subscribe("a").unwrap();
        assert!(a.id() < b.id() && b.id() < c.id());
        assert!(a.is_cancelled() && b.is_cancelled());
        assert!(!c.is_cancelled());
    }

    #[test]
    fn test_invalid_topic_emits_nothing() {
        let broker = Broker::new();
        let seen = Rc::new(Cell::new(0));
        let s = seen.clone();
        broker
            .on_fn(EventKind::Message, move |_| s.set(s.get() + 1))
            .unwrap();

        assert!(broker.publish("a..b", json!(1)).is_err());
        assert!(broker.subscribe("").is_err());
        assert!(broker.unsubscribe(".").is_err());
        assert_eq!(seen.get(), 0);
    }

    #[test]
    fn test_event_order_on_subscribe() {
        let broker = Broker::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::NewTopic, EventKind::Subscribe] {
            let l = log.clone();
            broker
                .on_fn(kind, move |e| l.borrow_mut().push(e.kind().name()))
                .unwrap();
        }
        broker.subscribe("a").unwrap();
        broker.subscribe("a").unwrap();
        assert_eq!(*log.borrow(), vec!["new topic", "subscribe", "subscribe"]);
    }

    #[test]
    fn test_from_config_selects_compiler() {
        let config = BrokerConfig {
            filter_compiler: CompilerKind::Query,
        };
        let broker = Broker::from_config(&config);
        assert_eq!(broker.compiler_name(), "query");

        let sub = broker.subscribe("a").unwrap();
        sub.set_filter(json!({"n": {"$gt": 1}})).unwrap();
        assert!(Broker::new()
            .subscribe("a")
            .unwrap()
            .set_filter(json!({"n": 1}))
            .is_err());
    }

    #[test]
    fn test_destroy_clears_listeners_after_teardown() {
        let broker = Broker::new();
        let cancels = Rc::new(Cell::new(0));
        let c = cancels.clone();
        broker
            .on_fn(EventKind::Cancel, move |_| c.set(c.get() + 1))
            .unwrap();
        broker.subscribe("a").unwrap();
        broker.subscribe("b.c").unwrap();

        broker.destroy();
        assert_eq!(cancels.get(), 2);
        assert_eq!(broker.listener_count(EventKind::Cancel), 0);
        assert!(broker.count().unwrap().is_empty());
    }
}
