//! Уведомления брокера.
//!
//! Набор событий закрыт: `subscribe`, `cancel`, `new topic`, `empty topic`,
//! `message`. Слушатели хранятся в таблице фиксированного размера,
//! индексируемой [`EventKind`].

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use strum_macros::{AsRefStr, EnumIter, EnumString};

use super::{Meta, Payload, Subscription};
use crate::error::{PubSubError, PubSubResult};

/// Вид уведомления брокера.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, AsRefStr, EnumIter)]
pub enum EventKind {
    #[strum(serialize = "subscribe")]
    Subscribe,
    #[strum(serialize = "cancel")]
    Cancel,
    #[strum(serialize = "new topic")]
    NewTopic,
    #[strum(serialize = "empty topic")]
    EmptyTopic,
    #[strum(serialize = "message")]
    Message,
}

impl EventKind {
    pub const COUNT: usize = 5;

    /// Разбирает имя события; неизвестное имя — [`PubSubError::UnknownEvent`].
    pub fn from_name(name: &str) -> PubSubResult<Self> {
        name.parse().map_err(|_| PubSubError::unknown_event(name))
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Subscribe => "subscribe",
            EventKind::Cancel => "cancel",
            EventKind::NewTopic => "new topic",
            EventKind::EmptyTopic => "empty topic",
            EventKind::Message => "message",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EventKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Уведомление с типизированной нагрузкой.
#[derive(Debug, Clone, Copy)]
pub enum BrokerEvent<'a> {
    Subscribe(&'a Subscription),
    Cancel(&'a Subscription),
    NewTopic(&'a str),
    EmptyTopic(&'a str),
    Message {
        topic: &'a str,
        message: &'a Payload,
        meta: &'a Meta,
    },
}

impl BrokerEvent<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            BrokerEvent::Subscribe(_) => EventKind::Subscribe,
            BrokerEvent::Cancel(_) => EventKind::Cancel,
            BrokerEvent::NewTopic(_) => EventKind::NewTopic,
            BrokerEvent::EmptyTopic(_) => EventKind::EmptyTopic,
            BrokerEvent::Message { .. } => EventKind::Message,
        }
    }

    /// Подписка, к которой относится событие (`subscribe`, `cancel`).
    pub fn subscription(&self) -> Option<&Subscription> {
        match *self {
            BrokerEvent::Subscribe(sub) | BrokerEvent::Cancel(sub) => Some(sub),
            _ => None,
        }
    }

    /// Топик события. Для `subscribe`/`cancel` — топик подписки.
    pub fn topic(&self) -> &str {
        match *self {
            BrokerEvent::Subscribe(sub) | BrokerEvent::Cancel(sub) => sub.topic(),
            BrokerEvent::NewTopic(topic) | BrokerEvent::EmptyTopic(topic) => topic,
            BrokerEvent::Message { topic, .. } => topic,
        }
    }
}

/// Слушатель уведомлений брокера.
pub type BrokerListener = Rc<dyn Fn(&BrokerEvent<'_>)>;

/// Идентификатор зарегистрированного слушателя; нужен для `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl ListenerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

type Slot = Vec<(ListenerId, BrokerListener)>;

/// Таблица слушателей по видам событий.
///
/// Разделяется брокером и всеми узлами его дерева. `emit` делает снимок
/// слушателей до вызова, поэтому слушатель может подписываться и
/// отписываться прямо из колбэка.
pub(crate) struct Notifications {
    next_id: Cell<u64>,
    table: RefCell<[Slot; EventKind::COUNT]>,
}

impl Notifications {
    pub(crate) fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            table: RefCell::new(Default::default()),
        }
    }

    pub(crate) fn add(
        &self,
        kind: EventKind,
        listener: BrokerListener,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.table.borrow_mut()[kind.index()].push((id, listener));
        id
    }

    pub(crate) fn remove(
        &self,
        kind: EventKind,
        id: ListenerId,
    ) -> bool {
        let mut table = self.table.borrow_mut();
        let slot = &mut table[kind.index()];
        match slot.iter().position(|(lid, _)| *lid == id) {
            Some(pos) => {
                slot.remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn emit(
        &self,
        event: &BrokerEvent<'_>,
    ) {
        let listeners: Vec<BrokerListener> = self.table.borrow()[event.kind().index()]
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub(crate) fn listener_count(
        &self,
        kind: EventKind,
    ) -> usize {
        self.table.borrow()[kind.index()].len()
    }

    pub(crate) fn clear(&self) {
        let drained = std::mem::take(&mut *self.table.borrow_mut());
        drop(drained);
    }
}
