//! Песочница: шина-посредник с учётом созданных через неё подписок и
//! слушателей.
//!
//! Все операции передаются родительской шине. `destroy` отменяет только то,
//! что было создано через эту песочницу, и отсоединяет её от родителя.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt,
    rc::{Rc, Weak},
};

use tracing::debug;

use super::{
    BrokerListener, EventKind, ListenerId, MessageBus, MessageListener, Meta, Payload,
    Subscription, SubscriptionId, Topic,
};
use crate::error::{PubSubError, PubSubResult};

struct SandboxInner {
    parent: RefCell<Option<Rc<dyn MessageBus>>>,
    subscriptions: RefCell<BTreeMap<SubscriptionId, Subscription>>,
    listeners: RefCell<Vec<(EventKind, ListenerId)>>,
}

#[derive(Clone)]
pub struct Sandbox(Rc<SandboxInner>);

impl Sandbox {
    pub(crate) fn new(parent: Rc<dyn MessageBus>) -> Self {
        Self(Rc::new(SandboxInner {
            parent: RefCell::new(Some(parent)),
            subscriptions: RefCell::new(BTreeMap::new()),
            listeners: RefCell::new(Vec::new()),
        }))
    }

    fn parent(&self) -> PubSubResult<Rc<dyn MessageBus>> {
        self.0.parent.borrow().clone().ok_or(PubSubError::Detached)
    }

    pub fn is_detached(&self) -> bool {
        self.0.parent.borrow().is_none()
    }

    /// Живые подписки песочницы в порядке создания.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.0.subscriptions.borrow().values().cloned().collect()
    }
}

impl MessageBus for Sandbox {
    fn publish_with_meta(
        &self,
        topic: &str,
        message: Payload,
        meta: Meta,
    ) -> PubSubResult<()> {
        self.parent()?.publish_with_meta(topic, message, meta)
    }

    fn subscribe_with(
        &self,
        topic: &str,
        on_message: Option<MessageListener>,
    ) -> PubSubResult<Subscription> {
        let sub = self.parent()?.subscribe_with(topic, on_message)?;

        let owner: Weak<SandboxInner> = Rc::downgrade(&self.0);
        let tracked = sub.on_cancel(move |sub| {
            if let Some(inner) = owner.upgrade() {
                inner.subscriptions.borrow_mut().remove(&sub.id());
            }
        });
        if tracked.is_some() {
            self.0
                .subscriptions
                .borrow_mut()
                .insert(sub.id(), sub.clone());
        }
        Ok(sub)
    }

    /// Отменяет только подписки этой песочницы на `topic`.
    fn unsubscribe(
        &self,
        topic: &str,
    ) -> PubSubResult<()> {
        self.parent()?;
        Topic::parse(topic)?;
        let matching: Vec<Subscription> = self
            .0
            .subscriptions
            .borrow()
            .values()
            .filter(|s| s.topic() == topic)
            .cloned()
            .collect();
        for sub in matching {
            sub.cancel();
        }
        Ok(())
    }

    fn count(&self) -> PubSubResult<BTreeMap<String, usize>> {
        self.parent()?;
        let mut out = BTreeMap::new();
        for sub in self.0.subscriptions.borrow().values() {
            if !sub.is_cancelled() {
                *out.entry(sub.topic().to_string()).or_insert(0) += 1;
            }
        }
        Ok(out)
    }

    fn count_all(&self) -> PubSubResult<BTreeMap<String, usize>> {
        self.parent()?.count_all()
    }

    fn on(
        &self,
        kind: EventKind,
        listener: BrokerListener,
    ) -> PubSubResult<ListenerId> {
        let id = self.parent()?.on(kind, listener)?;
        self.0.listeners.borrow_mut().push((kind, id));
        Ok(id)
    }

    /// Снимает только слушателей, зарегистрированных через эту песочницу.
    fn off(
        &self,
        kind: EventKind,
        id: ListenerId,
    ) -> PubSubResult<bool> {
        let parent = self.parent()?;
        let position = self
            .0
            .listeners
            .borrow()
            .iter()
            .position(|entry| *entry == (kind, id));
        match position {
            Some(pos) => {
                self.0.listeners.borrow_mut().remove(pos);
                parent.off(kind, id)
            }
            None => Ok(false),
        }
    }

    fn sandbox(&self) -> PubSubResult<Sandbox> {
        self.parent()?;
        Ok(Sandbox::new(Rc::new(self.clone())))
    }

    fn destroy(&self) {
        let Some(parent) = self.0.parent.borrow().clone() else {
            return;
        };

        let subscriptions = std::mem::take(&mut *self.0.subscriptions.borrow_mut());
        let listeners = std::mem::take(&mut *self.0.listeners.borrow_mut());
        debug!(
            "Destroying sandbox with {} subscription(s) and {} listener(s)",
            subscriptions.len(),
            listeners.len()
        );

        for sub in subscriptions.into_values() {
            sub.cancel();
        }
        for (kind, id) in listeners {
            if let Err(err) = parent.off(kind, id) {
                debug!("Listener {id} for {kind} was not removed: {err}");
            }
        }
        self.0.parent.borrow_mut().take();
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("subscriptions", &self.0.subscriptions.borrow().len())
            .field("listeners", &self.0.listeners.borrow().len())
            .field("detached", &self.is_detached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pubsub::Broker;

    #[test]
    fn test_sandbox_counts_only_its_own() {
        let broker = Broker::new();
        let sandbox = broker.sandbox().unwrap();
        broker.subscribe("a").unwrap();
        sandbox.subscribe("a").unwrap();
        sandbox.subscribe("b").unwrap();

        let own = sandbox.count().unwrap();
        assert_eq!(own.get("a"), Some(&1));
        assert_eq!(own.get("b"), Some(&1));
        assert_eq!(sandbox.count_all().unwrap().get("a"), Some(&2));
    }

    #[test]
    fn test_cancelled_subscription_is_forgotten() {
        let broker = Broker::new();
        let sandbox = broker.sandbox().unwrap();
        let sub = sandbox.subscribe("a").unwrap();
        sub.cancel();
        assert!(sandbox.subscriptions().is_empty());
    }

    #[test]
    fn test_operations_after_destroy_fail() {
        let broker = Broker::new();
        let sandbox = broker.sandbox().unwrap();
        sandbox.destroy();
        sandbox.destroy();

        assert!(sandbox.is_detached());
        assert_eq!(sandbox.subscribe("a").unwrap_err(), PubSubError::Detached);
        assert_eq!(
            sandbox.publish("a", json!(null)).unwrap_err(),
            PubSubError::Detached
        );
        assert_eq!(sandbox.count().unwrap_err(), PubSubError::Detached);
        assert!(sandbox.sandbox().is_err());
    }

    #[test]
    fn test_off_ignores_foreign_listeners() {
        let broker = Broker::new();
        let sandbox = broker.sandbox().unwrap();
        let foreign = broker.on_fn(EventKind::Cancel, |_| {}).unwrap();
        assert!(!sandbox.off(EventKind::Cancel, foreign).unwrap());
        assert_eq!(broker.listener_count(EventKind::Cancel), 1);

        let own = sandbox.on_fn(EventKind::Cancel, |_| {}).unwrap();
        assert!(sandbox.off(EventKind::Cancel, own).unwrap());
        assert_eq!(broker.listener_count(EventKind::Cancel), 1);
    }

    /// Тест проверяет, что вложенная песочница уничтожается и после
    /// уничтожения родительской песочницы.
    #[test]
    fn test_destroy_after_parent_destroyed() {
        let broker = Broker::new();
        let outer = broker.sandbox().unwrap();
        let nested = outer.sandbox().unwrap();
        nested.on_fn(EventKind::Message, |_| {}).unwrap();
        assert_eq!(broker.listener_count(EventKind::Message), 1);

        outer.destroy();
        assert_eq!(broker.listener_count(EventKind::Message), 0);

        nested.destroy();
        assert!(nested.is_detached());
        assert_eq!(nested.count().unwrap_err(), PubSubError::Detached);
    }
}
