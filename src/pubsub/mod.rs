//! Подсистема Publish–Subscribe (pub/sub).
//!
//! Внутрипроцессная шина сообщений с иерархическими топиками и шаблонами:
//!
//! - `topic`: разбор и проверка топиков, сегменты `*` и `**`.
//! - `message`: тело сообщения и метаданные.
//! - `filter`: предикаты фильтров и стратегии компиляции дескрипторов.
//! - `subscription`: подписка и её жизненный цикл (фильтр, лимит, отмена).
//! - `trie` (приватный): дерево подписок и доставка по шаблонам.
//! - `events`: уведомления брокера (`subscribe`, `cancel`, `new topic`,
//!   `empty topic`, `message`).
//! - `bus`: трейт `MessageBus`, общий для брокера и песочницы.
//! - `broker`: брокер сообщений.
//! - `sandbox`: песочница с массовой отменой созданного через неё.
//!
//! Всё однопоточно (`Rc`/`RefCell`); колбэки могут реентерабельно
//! подписываться, отменять и публиковать во время доставки.

pub mod broker;
pub mod bus;
pub mod events;
pub mod filter;
pub mod message;
pub mod sandbox;
pub mod subscription;
pub mod topic;
mod trie;

// Публичный экспорт типов из вложенных модулей, чтобы упростить доступ к
// ним из внешнего кода.
pub use broker::*;
pub use bus::*;
pub use events::{BrokerEvent, BrokerListener, EventKind, ListenerId};
pub use filter::{CompilerKind, FilterCompiler, FilterSpec, Predicate, PredicateOnly, QueryCompiler};
pub use message::*;
pub use sandbox::*;
pub use subscription::*;
pub use topic::*;
