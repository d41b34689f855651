use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use serde::Serialize;
use serde_json::Value;
use strum_macros::{AsRefStr, EnumString};
use tracing::debug;

use super::{
    events::ListenerId,
    filter::{Filter, FilterCompiler, FilterSpec},
    trie::TrieNode,
    Meta, Payload, Topic,
};
use crate::error::{PubSubError, PubSubResult};

/// Уникальный идентификатор подписки. Монотонно растёт и не
/// переиспользуется в пределах брокера.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub(crate) u64);

impl SubscriptionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Cancelled,
}

/// События отдельной подписки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionEventKind {
    Message,
    Cancel,
}

/// Событие подписки, передаваемое слушателям `on`.
#[derive(Debug, Clone, Copy)]
pub enum SubscriptionEvent<'a> {
    Message {
        topic: &'a str,
        message: &'a Payload,
        meta: &'a Meta,
        subscription: &'a Subscription,
    },
    Cancel(&'a Subscription),
}

impl SubscriptionEvent<'_> {
    pub fn kind(&self) -> SubscriptionEventKind {
        match self {
            SubscriptionEvent::Message { .. } => SubscriptionEventKind::Message,
            SubscriptionEvent::Cancel(_) => SubscriptionEventKind::Cancel,
        }
    }
}

pub type SubscriptionListener = Rc<dyn Fn(&SubscriptionEvent<'_>)>;

/// Колбэк доставки: `(message, topic, meta, subscription)`.
pub type MessageListener = Rc<dyn Fn(&Payload, &str, &Meta, &Subscription)>;

/// Снимок подписки для сериализации.
///
/// `filter` — исходный дескриптор, `true` для непрозрачного предиката,
/// `null` если фильтра нет. `limit` равен `null` для неограниченной подписки.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionSnapshot {
    pub id: SubscriptionId,
    pub topic: String,
    pub filter: Value,
    pub limit: Option<u64>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    message: Vec<(ListenerId, SubscriptionListener)>,
    cancel: Vec<(ListenerId, SubscriptionListener)>,
}

impl Listeners {
    fn slot(
        &mut self,
        kind: SubscriptionEventKind,
    ) -> &mut Vec<(ListenerId, SubscriptionListener)> {
        match kind {
            SubscriptionEventKind::Message => &mut self.message,
            SubscriptionEventKind::Cancel => &mut self.cancel,
        }
    }

    fn snapshot(
        &self,
        kind: SubscriptionEventKind,
    ) -> Vec<SubscriptionListener> {
        let slot = match kind {
            SubscriptionEventKind::Message => &self.message,
            SubscriptionEventKind::Cancel => &self.cancel,
        };
        slot.iter().map(|(_, l)| Rc::clone(l)).collect()
    }
}

struct Inner {
    id: SubscriptionId,
    topic: Topic,
    state: Cell<SubscriptionState>,
    limit: Cell<u64>,
    delivered: Cell<u64>,
    filter: RefCell<Option<Filter>>,
    listeners: RefCell<Listeners>,
    owner: RefCell<Weak<TrieNode>>,
    compiler: Rc<dyn FilterCompiler>,
}

/// Одна регистрация слушателя на топик.
///
/// Дешёвый клонируемый хендл: все клоны указывают на одну подписку.
/// Состояние меняется только в одну сторону, `Active → Cancelled`.
#[derive(Clone)]
pub struct Subscription(Rc<Inner>);

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        topic: Topic,
        compiler: Rc<dyn FilterCompiler>,
    ) -> Self {
        Self(Rc::new(Inner {
            id,
            topic,
            state: Cell::new(SubscriptionState::Active),
            limit: Cell::new(0),
            delivered: Cell::new(0),
            filter: RefCell::new(None),
            listeners: RefCell::new(Listeners::default()),
            owner: RefCell::new(Weak::new()),
            compiler,
        }))
    }

    pub(crate) fn attach(
        &self,
        owner: Weak<TrieNode>,
    ) {
        *self.0.owner.borrow_mut() = owner;
    }

    pub fn id(&self) -> SubscriptionId {
        self.0.id
    }

    pub fn topic(&self) -> &str {
        self.0.topic.as_str()
    }

    pub fn parsed_topic(&self) -> &Topic {
        &self.0.topic
    }

    pub fn state(&self) -> SubscriptionState {
        self.0.state.get()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == SubscriptionState::Cancelled
    }

    /// Лимит доставок; `0` — без ограничения.
    pub fn limit(&self) -> u64 {
        self.0.limit.get()
    }

    /// Сколько сообщений прошло фильтр и было доставлено.
    pub fn message_count(&self) -> u64 {
        self.0.delivered.get()
    }

    pub fn has_filter(&self) -> bool {
        self.0.filter.borrow().is_some()
    }

    /// Дескриптор, из которого скомпилирован текущий фильтр.
    pub fn filter_descriptor(&self) -> Option<Value> {
        self.0
            .filter
            .borrow()
            .as_ref()
            .and_then(|f| f.descriptor.clone())
    }

    /// Устанавливает лимит доставок. После `n`-й доставки подписка
    /// отменяется сама.
    pub fn set_limit(
        &self,
        n: u64,
    ) -> PubSubResult<()> {
        if n == 0 {
            return Err(PubSubError::InvalidConfiguration(
                "limit must be a positive integer".to_string(),
            ));
        }
        self.0.limit.set(n);
        Ok(())
    }

    /// Устанавливает фильтр: готовый предикат или дескриптор, который
    /// компилируется стратегией брокера.
    ///
    /// У отменённой подписки дескриптор всё равно проверяется, но фильтр не
    /// сохраняется.
    pub fn set_filter(
        &self,
        spec: impl Into<FilterSpec>,
    ) -> PubSubResult<()> {
        let filter = match spec.into() {
            FilterSpec::Predicate(predicate) => Filter {
                predicate,
                descriptor: None,
            },
            FilterSpec::Descriptor(descriptor) => Filter {
                predicate: self.0.compiler.compile(&descriptor)?,
                descriptor: Some(descriptor),
            },
        };
        if !self.is_cancelled() {
            *self.0.filter.borrow_mut() = Some(filter);
        }
        Ok(())
    }

    pub fn clear_filter(&self) {
        self.0.filter.borrow_mut().take();
    }

    /// Регистрирует слушателя события `message` или `cancel`.
    ///
    /// У отменённой подписки ничего не делает и возвращает `Ok(None)`, даже
    /// для неизвестного имени события.
    pub fn on(
        &self,
        event: &str,
        listener: SubscriptionListener,
    ) -> PubSubResult<Option<ListenerId>> {
        if self.is_cancelled() {
            return Ok(None);
        }
        let kind = parse_event(event)?;
        Ok(Some(self.add_listener(kind, listener)))
    }

    /// Снимает слушателя. `Ok(false)`, если такого нет или подписка отменена.
    pub fn off(
        &self,
        event: &str,
        id: ListenerId,
    ) -> PubSubResult<bool> {
        if self.is_cancelled() {
            return Ok(false);
        }
        let kind = parse_event(event)?;
        let mut listeners = self.0.listeners.borrow_mut();
        let slot = listeners.slot(kind);
        Ok(match slot.iter().position(|(lid, _)| *lid == id) {
            Some(pos) => {
                slot.remove(pos);
                true
            }
            None => false,
        })
    }

    pub fn on_message<F>(
        &self,
        f: F,
    ) -> Option<ListenerId>
    where
        F: Fn(&Payload, &str, &Meta, &Subscription) + 'static,
    {
        self.on_message_listener(Rc::new(f))
    }

    pub fn on_cancel<F>(
        &self,
        f: F,
    ) -> Option<ListenerId>
    where
        F: Fn(&Subscription) + 'static,
    {
        if self.is_cancelled() {
            return None;
        }
        Some(self.add_listener(
            SubscriptionEventKind::Cancel,
            Rc::new(move |event: &SubscriptionEvent<'_>| {
                if let SubscriptionEvent::Cancel(sub) = *event {
                    f(sub)
                }
            }),
        ))
    }

    pub(crate) fn on_message_listener(
        &self,
        f: MessageListener,
    ) -> Option<ListenerId> {
        if self.is_cancelled() {
            return None;
        }
        Some(self.add_listener(
            SubscriptionEventKind::Message,
            Rc::new(move |event: &SubscriptionEvent<'_>| {
                if let SubscriptionEvent::Message {
                    topic,
                    message,
                    meta,
                    subscription,
                } = *event
                {
                    f(message, topic, meta, subscription)
                }
            }),
        ))
    }

    fn add_listener(
        &self,
        kind: SubscriptionEventKind,
        listener: SubscriptionListener,
    ) -> ListenerId {
        let mut listeners = self.0.listeners.borrow_mut();
        listeners.next_id += 1;
        let id = ListenerId(listeners.next_id);
        listeners.slot(kind).push((id, listener));
        id
    }

    /// Доставка одного сообщения.
    ///
    /// Отменённая подписка и сообщение, отклонённое фильтром, пропускаются
    /// без побочных эффектов. По достижении лимита подписка отменяется до
    /// возврата.
    pub(crate) fn send(
        &self,
        topic: &str,
        message: &Payload,
        meta: &Meta,
    ) {
        if self.is_cancelled() {
            return;
        }

        let predicate = self
            .0
            .filter
            .borrow()
            .as_ref()
            .map(|f| Rc::clone(&f.predicate));
        if let Some(predicate) = predicate {
            if !predicate(message, topic, meta, self) {
                return;
            }
        }

        let delivered = self.0.delivered.get() + 1;
        self.0.delivered.set(delivered);

        let listeners = self
            .0
            .listeners
            .borrow()
            .snapshot(SubscriptionEventKind::Message);
        let event = SubscriptionEvent::Message {
            topic,
            message,
            meta,
            subscription: self,
        };
        for listener in listeners {
            listener(&event);
        }

        let limit = self.0.limit.get();
        if limit > 0 && delivered >= limit {
            debug!("Subscription {} reached its limit of {}", self.0.id, limit);
            self.cancel();
        }
    }

    /// Отменяет подписку. Повторный вызов ничего не делает.
    ///
    /// Слушатели `cancel` вызываются до того, как подписка покинет дерево;
    /// после этого все слушатели и фильтр освобождаются.
    pub fn cancel(&self) {
        if self.is_cancelled() {
            return;
        }
        self.0.state.set(SubscriptionState::Cancelled);

        let listeners = self
            .0
            .listeners
            .borrow()
            .snapshot(SubscriptionEventKind::Cancel);
        let event = SubscriptionEvent::Cancel(self);
        for listener in listeners {
            listener(&event);
        }

        let released = std::mem::take(&mut *self.0.listeners.borrow_mut());
        drop(released);
        let filter = self.0.filter.borrow_mut().take();
        drop(filter);

        debug!("Subscription {} on {:?} cancelled", self.0.id, self.topic());

        let owner = std::mem::take(&mut *self.0.owner.borrow_mut());
        if let Some(node) = owner.upgrade() {
            node.detach(self);
        }
    }

    pub fn serialize(&self) -> SubscriptionSnapshot {
        let filter = match self.0.filter.borrow().as_ref() {
            Some(Filter {
                descriptor: Some(d),
                ..
            }) => d.clone(),
            Some(_) => Value::Bool(true),
            None => Value::Null,
        };
        let limit = self.limit();
        SubscriptionSnapshot {
            id: self.id(),
            topic: self.topic().to_string(),
            filter,
            limit: (limit > 0).then_some(limit),
        }
    }

    pub(crate) fn ptr_eq(
        &self,
        other: &Subscription,
    ) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

fn parse_event(name: &str) -> PubSubResult<SubscriptionEventKind> {
    name.parse().map_err(|_| PubSubError::unknown_event(name))
}

impl PartialEq for Subscription {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Subscription {}

impl fmt::Debug for Subscription {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.0.id)
            .field("topic", &self.topic())
            .field("state", &self.state())
            .field("limit", &self.limit())
            .field("delivered", &self.message_count())
            .field("filter", &self.has_filter())
            .finish()
    }
}
