use std::{collections::BTreeMap, rc::Rc};

use super::{
    empty_meta, BrokerEvent, BrokerListener, EventKind, ListenerId, MessageListener, Meta,
    Payload, Sandbox, Subscription,
};
use crate::error::PubSubResult;

/// Общий интерфейс шины: брокер и песочница.
///
/// Трейт объектно-безопасен; обобщённые помощники помечены
/// `where Self: Sized`.
pub trait MessageBus {
    /// Публикует сообщение. Неверный топик — `InvalidTopic`, при этом
    /// ничего не испускается и не доставляется.
    fn publish_with_meta(
        &self,
        topic: &str,
        message: Payload,
        meta: Meta,
    ) -> PubSubResult<()>;

    /// Создаёт подписку, при необходимости сразу с колбэком доставки.
    fn subscribe_with(
        &self,
        topic: &str,
        on_message: Option<MessageListener>,
    ) -> PubSubResult<Subscription>;

    /// Отменяет подписки, зарегистрированные ровно на `topic`.
    fn unsubscribe(
        &self,
        topic: &str,
    ) -> PubSubResult<()>;

    /// Число подписок по топикам, видимых через эту шину.
    fn count(&self) -> PubSubResult<BTreeMap<String, usize>>;

    /// Число подписок по топикам во всём брокере.
    fn count_all(&self) -> PubSubResult<BTreeMap<String, usize>>;

    fn on(
        &self,
        kind: EventKind,
        listener: BrokerListener,
    ) -> PubSubResult<ListenerId>;

    fn off(
        &self,
        kind: EventKind,
        id: ListenerId,
    ) -> PubSubResult<bool>;

    /// Новая песочница поверх этой шины.
    fn sandbox(&self) -> PubSubResult<Sandbox>;

    fn destroy(&self);

    fn publish(
        &self,
        topic: &str,
        message: Payload,
    ) -> PubSubResult<()> {
        self.publish_with_meta(topic, message, empty_meta())
    }

    fn subscribe(
        &self,
        topic: &str,
    ) -> PubSubResult<Subscription> {
        self.subscribe_with(topic, None)
    }

    /// Подписка по имени события, как в `on("new topic", ...)`.
    fn on_event(
        &self,
        name: &str,
        listener: BrokerListener,
    ) -> PubSubResult<ListenerId> {
        self.on(EventKind::from_name(name)?, listener)
    }

    fn subscribe_fn<F>(
        &self,
        topic: &str,
        f: F,
    ) -> PubSubResult<Subscription>
    where
        Self: Sized,
        F: Fn(&Payload, &str, &Meta, &Subscription) + 'static,
    {
        self.subscribe_with(topic, Some(Rc::new(f)))
    }

    fn on_fn<F>(
        &self,
        kind: EventKind,
        f: F,
    ) -> PubSubResult<ListenerId>
    where
        Self: Sized,
        F: Fn(&BrokerEvent<'_>) + 'static,
    {
        self.on(kind, Rc::new(f))
    }
}
