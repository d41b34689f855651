//! Дерево подписок по сегментам топика.
//!
//! Каждый узел хранит подписки, зарегистрированные ровно на его префикс, и
//! дочерние узлы в порядке создания. Узлы создаются лениво и никогда не
//! удаляются.
//!
//! Доставка реентерабельна: колбэк подписчика может подписываться,
//! отменять подписки и публиковать, пока внешняя доставка ещё идёт. Ни
//! одно заимствование `RefCell` не удерживается во время вызова колбэка.

use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    rc::Rc,
};

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::{
    events::{BrokerEvent, Notifications},
    Meta, Payload, Segment, Subscription, SubscriptionId, SEPARATOR,
};

/// Подписки одного узла вместе с учётом реентерабельности.
///
/// Пока `depth > 0`, отмены откладываются в `pending` и применяются,
/// когда последний проход доставки покидает узел.
#[derive(Default)]
struct SubscriptionList {
    entries: RefCell<Vec<Subscription>>,
    pending: RefCell<Vec<SubscriptionId>>,
    depth: Cell<usize>,
}

impl SubscriptionList {
    fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    fn get(
        &self,
        index: usize,
    ) -> Option<Subscription> {
        self.entries.borrow().get(index).cloned()
    }

    fn live(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|s| !s.is_cancelled())
            .count()
    }

    fn snapshot(&self) -> Vec<Subscription> {
        self.entries.borrow().clone()
    }

    /// Добавляет подписку; `true`, если список был пуст.
    fn push(
        &self,
        sub: Subscription,
    ) -> bool {
        let mut entries = self.entries.borrow_mut();
        entries.push(sub);
        entries.len() == 1
    }

    /// Убирает подписку сразу или откладывает это. `true`, если список
    /// стал пустым.
    fn unlink(
        &self,
        sub: &Subscription,
    ) -> bool {
        let mut entries = self.entries.borrow_mut();
        if entries.len() == 1 && entries[0].ptr_eq(sub) {
            entries.clear();
            return true;
        }
        if self.depth.get() > 0 {
            self.pending.borrow_mut().push(sub.id());
            return false;
        }
        match entries.iter().position(|s| s.ptr_eq(sub)) {
            Some(pos) => {
                entries.remove(pos);
                entries.is_empty()
            }
            None => false,
        }
    }

    /// Применяет отложенные удаления. `true`, если список стал пустым.
    fn drain(&self) -> bool {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        if pending.is_empty() {
            return false;
        }
        let mut entries = self.entries.borrow_mut();
        if entries.is_empty() {
            return false;
        }

        let whole = pending.len() == entries.len()
            && entries.iter().all(|s| pending.contains(&s.id()));
        if whole {
            entries.clear();
            return true;
        }

        let mut indices: Vec<usize> = pending
            .iter()
            .filter_map(|id| entries.iter().position(|s| s.id() == *id))
            .collect();
        indices.sort_unstable_by(|a, b| b.cmp(a));
        indices.dedup();
        for index in indices {
            entries.remove(index);
        }
        entries.is_empty()
    }
}

#[derive(Default)]
struct Children {
    index: FxHashMap<Segment, usize>,
    nodes: Vec<Rc<TrieNode>>,
}

/// Узел дерева подписок.
pub(crate) struct TrieNode {
    path: String,
    events: Rc<Notifications>,
    list: SubscriptionList,
    children: RefCell<Children>,
}

impl TrieNode {
    pub(crate) fn root(events: Rc<Notifications>) -> Rc<Self> {
        Rc::new(Self::with_path(String::new(), events))
    }

    fn with_path(
        path: String,
        events: Rc<Notifications>,
    ) -> Self {
        Self {
            path,
            events,
            list: SubscriptionList::default(),
            children: RefCell::new(Children::default()),
        }
    }

    fn child(
        &self,
        segment: &Segment,
    ) -> Option<Rc<TrieNode>> {
        let children = self.children.borrow();
        children
            .index
            .get(segment)
            .map(|&i| Rc::clone(&children.nodes[i]))
    }

    fn child_or_insert(
        &self,
        segment: &Segment,
    ) -> Rc<TrieNode> {
        if let Some(child) = self.child(segment) {
            return child;
        }
        let path = if self.path.is_empty() {
            segment.as_str().to_string()
        } else {
            format!("{}{}{}", self.path, SEPARATOR, segment)
        };
        let child = Rc::new(Self::with_path(path, Rc::clone(&self.events)));
        let mut children = self.children.borrow_mut();
        let position = children.nodes.len();
        children.index.insert(segment.clone(), position);
        children.nodes.push(Rc::clone(&child));
        child
    }

    fn children_snapshot(&self) -> Vec<Rc<TrieNode>> {
        self.children.borrow().nodes.clone()
    }

    /// Регистрирует подписку в узле её топика, создавая недостающие узлы.
    ///
    /// Испускает `new topic`, если у узла появилась первая подписка.
    pub(crate) fn insert(
        self: &Rc<Self>,
        segments: &[Segment],
        sub: Subscription,
    ) {
        let mut node = Rc::clone(self);
        for segment in segments {
            node = node.child_or_insert(segment);
        }
        sub.attach(Rc::downgrade(&node));
        if node.list.push(sub) {
            debug!("Topic {:?} has subscribers", node.path);
            node.events.emit(&BrokerEvent::NewTopic(&node.path));
        }
    }

    /// Отменяет все подписки, зарегистрированные ровно на этот топик.
    ///
    /// Шаблоны не раскрываются: `a.*` отменяет только подписки на `a.*`.
    pub(crate) fn remove_exact(
        &self,
        segments: &[Segment],
    ) {
        let mut node = match segments.split_first() {
            Some((first, _)) => match self.child(first) {
                Some(node) => node,
                None => return,
            },
            None => return,
        };
        for segment in &segments[1..] {
            node = match node.child(segment) {
                Some(next) => next,
                None => return,
            };
        }
        for sub in node.list.snapshot() {
            sub.cancel();
        }
    }

    /// Доставка сообщения по оставшимся сегментам топика.
    ///
    /// Порядок в узле: подписчики дочернего `**`, затем (если сегменты
    /// кончились) собственные подписчики, затем спуск в `*` и в литерал.
    /// У дочернего `**` берутся только его собственные подписки, его
    /// потомки не посещаются.
    pub(crate) fn dispatch(
        &self,
        segments: &[Segment],
        topic: &str,
        message: &Payload,
        meta: &Meta,
    ) {
        if let Some(all) = self.child(&Segment::All) {
            all.deliver(topic, message, meta);
        }

        let Some((head, rest)) = segments.split_first() else {
            self.deliver(topic, message, meta);
            return;
        };

        if let Some(any) = self.child(&Segment::Any) {
            any.dispatch(rest, topic, message, meta);
        }
        if let Segment::Literal(_) = head {
            if let Some(child) = self.child(head) {
                child.dispatch(rest, topic, message, meta);
            }
        }
    }

    /// Передаёт сообщение собственным подпискам узла.
    ///
    /// Проход ограничен длиной списка на момент входа: подписки,
    /// добавленные во время прохода, его не получают.
    fn deliver(
        &self,
        topic: &str,
        message: &Payload,
        meta: &Meta,
    ) {
        let len = self.list.len();
        if len == 0 {
            return;
        }
        trace!("Delivering {:?} to {} subscriber(s) of {:?}", topic, len, self.path);

        self.list.depth.set(self.list.depth.get() + 1);
        for index in 0..len {
            let Some(sub) = self.list.get(index) else {
                break;
            };
            sub.send(topic, message, meta);
        }
        let depth = self.list.depth.get() - 1;
        self.list.depth.set(depth);

        if depth == 0 && self.list.drain() {
            self.emit_empty();
        }
    }

    /// Вызывается отменённой подпиской: испускает `cancel` и убирает её из
    /// списка узла.
    pub(crate) fn detach(
        &self,
        sub: &Subscription,
    ) {
        self.events.emit(&BrokerEvent::Cancel(sub));
        if self.list.unlink(sub) {
            self.emit_empty();
        }
    }

    fn emit_empty(&self) {
        debug!("Topic {:?} has no subscribers left", self.path);
        self.events.emit(&BrokerEvent::EmptyTopic(&self.path));
    }

    /// Число живых прямых подписок по полным топикам. Узлы без подписок
    /// пропускаются, но их потомки обходятся.
    pub(crate) fn count(
        &self,
        out: &mut BTreeMap<String, usize>,
    ) {
        let live = self.list.live();
        if live > 0 {
            out.insert(self.path.clone(), live);
        }
        for child in self.children_snapshot() {
            child.count(out);
        }
    }

    /// Обход в обратном порядке: сначала потомки в порядке создания, затем
    /// собственные подписки узла.
    pub(crate) fn destroy(&self) {
        for child in self.children_snapshot() {
            child.destroy();
        }
        for sub in self.list.snapshot() {
            sub.cancel();
        }
    }
}
