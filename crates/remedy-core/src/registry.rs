//! Registry - priority 付きの Handler 登録と管理
//!
//! # 学習ポイント
//! - BTreeMap による priority 昇順の走査
//! - RefCell による内部可変性（`&self` のまま register / with_handler）
//! - Drop guard による scoped 登録の確実な後始末（panic 時も含む）
//! - 遅延 Iterator（priority 単位で materialize）
//!
//! # コンテキストごとの Registry
//! `Registry` は `RefCell` を持つため `!Sync` で、スレッド間で共有できない。
//! スレッドごとのシングルトンが欲しい場合は `thread_local!` で宣言する:
//!
//! ```ignore
//! thread_local! {
//!     static HTTP_HANDLERS: Registry<Response, HttpError> = Registry::named("http");
//! }
//!
//! HTTP_HANDLERS.with(|registry| registry.register(Rc::new(TimeoutHandler)));
//! let response = HTTP_HANDLERS.with(|registry| execute(registry, || client.get(url)));
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::decision::{Action, Decision};
use crate::handler::Handler;

/// Lower values are consulted first.
pub type Priority = i32;

/// Priority used when none is given.
pub const DEFAULT_PRIORITY: Priority = 1000;

/// A handler as stored in a [`Registry`].
///
/// Identity is the allocation: registering two clones of the same `Rc` is a
/// duplicate, two separate `Rc::new` calls are two handlers.
pub type SharedHandler<T, E> = Rc<dyn Handler<T, E>>;

type Buckets<T, E> = BTreeMap<Priority, Vec<SharedHandler<T, E>>>;

struct Storage<T, E> {
    permanent: Buckets<T, E>,
    scoped: Buckets<T, E>,
}

impl<T, E> Default for Storage<T, E> {
    fn default() -> Self {
        Self {
            permanent: BTreeMap::new(),
            scoped: BTreeMap::new(),
        }
    }
}

fn insert<T, E>(
    buckets: &mut Buckets<T, E>,
    priority: Priority,
    handler: SharedHandler<T, E>,
) -> bool {
    let bucket = buckets.entry(priority).or_default();
    if bucket.iter().any(|h| Rc::ptr_eq(h, &handler)) {
        return false;
    }
    bucket.push(handler);
    true
}

fn delete<T, E>(
    buckets: &mut Buckets<T, E>,
    priority: Priority,
    handler: &SharedHandler<T, E>,
) -> bool {
    let Some(bucket) = buckets.get_mut(&priority) else {
        return false;
    };
    let Some(index) = bucket.iter().position(|h| Rc::ptr_eq(h, handler)) else {
        return false;
    };
    bucket.remove(index);
    if bucket.is_empty() {
        buckets.remove(&priority);
    }
    true
}

fn first_after<T, E>(buckets: &Buckets<T, E>, after: Option<Priority>) -> Option<Priority> {
    let lower = match after {
        Some(p) => Bound::Excluded(p),
        None => Bound::Unbounded,
    };
    buckets.range((lower, Bound::Unbounded)).next().map(|(p, _)| *p)
}

/// Registry は priority ごとに Handler を保持し、合成 Handler として振る舞う
///
/// # 使用例
/// ```ignore
/// let registry = Registry::new();
/// registry.register(Rc::new(LogAndContinue));
/// registry.register_at(Rc::new(RetryOnTimeout), 10);
///
/// let value = execute(&registry, || fetch())?;
/// ```
///
/// # 内部実装
/// - permanent: `register` / `remove` で管理
/// - scoped: `with_handler` の実行中だけ存在
/// - 走査順: priority 昇順 → 同一 priority 内は `name()` 昇順、重複は 1 回だけ
/// - retry_decider: 直近の `handle` で Retry を決めた Handler（同名でも Rc で特定）
pub struct Registry<T, E> {
    name: String,
    storage: RefCell<Storage<T, E>>,
    retry_decider: RefCell<Option<SharedHandler<T, E>>>,
}

impl<T, E> Registry<T, E> {
    pub fn new() -> Self {
        Self::named("registry")
    }

    /// The name is what the registry sorts under when it is itself
    /// registered in another registry.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: RefCell::new(Storage::default()),
            retry_decider: RefCell::new(None),
        }
    }

    pub const fn default_priority() -> Priority {
        DEFAULT_PRIORITY
    }

    /// Register `handler` at [`DEFAULT_PRIORITY`].
    pub fn register(&self, handler: SharedHandler<T, E>) -> bool {
        self.register_at(handler, DEFAULT_PRIORITY)
    }

    /// Returns `false` if the handler was already registered at `priority`.
    pub fn register_at(&self, handler: SharedHandler<T, E>, priority: Priority) -> bool {
        let name = handler.name().to_string();
        let added = insert(&mut self.storage.borrow_mut().permanent, priority, handler);
        debug!(registry = %self.name, handler = %name, priority, added, "register handler");
        added
    }

    pub fn remove(&self, handler: &SharedHandler<T, E>) -> bool {
        self.remove_at(handler, DEFAULT_PRIORITY)
    }

    /// Returns `false` if the handler was not registered at `priority`.
    ///
    /// Scoped registrations are not touched.
    pub fn remove_at(&self, handler: &SharedHandler<T, E>, priority: Priority) -> bool {
        let removed = delete(&mut self.storage.borrow_mut().permanent, priority, handler);
        debug!(
            registry = %self.name,
            handler = handler.name(),
            priority,
            removed,
            "remove handler"
        );
        removed
    }

    pub fn with_handler<R>(&self, handler: SharedHandler<T, E>, block: impl FnOnce() -> R) -> R {
        self.with_handler_at(handler, DEFAULT_PRIORITY, block)
    }

    /// Register `handler` at `priority` for the duration of `block`.
    ///
    /// The registration is removed when `block` returns or unwinds, but only
    /// if this call added it: nested calls with the same handler and priority
    /// leave the removal to the outermost one.
    pub fn with_handler_at<R>(
        &self,
        handler: SharedHandler<T, E>,
        priority: Priority,
        block: impl FnOnce() -> R,
    ) -> R {
        let _scope = ScopedRegistration::enter(self, handler, priority);
        block()
    }

    /// Drop every permanent and scoped registration.
    pub fn reset(&self) {
        let mut storage = self.storage.borrow_mut();
        storage.permanent.clear();
        storage.scoped.clear();
        debug!(registry = %self.name, "reset handlers");
    }

    /// Lazily walk the handlers in traversal order.
    ///
    /// Each priority level is read when the iterator reaches it, so changes
    /// made while iterating can show up: a level added above the current one
    /// is visited, a level added below it is not. This is looser than sorting
    /// the priorities once up front, which would skip every level added after
    /// the walk started. `collect()` first for a snapshot.
    pub fn ordered_handlers(&self) -> OrderedHandlers<'_, T, E> {
        OrderedHandlers {
            registry: self,
            last_priority: None,
            level: Vec::new().into_iter(),
        }
    }

    /// Handlers matching `error`, in traversal order.
    pub fn matching_handlers(&self, error: &E) -> Vec<SharedHandler<T, E>> {
        self.ordered_handlers().filter(|h| h.matches(error)).collect()
    }

    /// Number of entries a full traversal visits.
    pub fn len(&self) -> usize {
        self.ordered_handlers().count()
    }

    pub fn is_empty(&self) -> bool {
        let storage = self.storage.borrow();
        storage.permanent.is_empty() && storage.scoped.is_empty()
    }

    /// The next populated priority above `after`, with its deduplicated,
    /// name-sorted handlers.
    fn level_after(&self, after: Option<Priority>) -> Option<(Priority, Vec<SharedHandler<T, E>>)> {
        let storage = self.storage.borrow();
        let priority = match (
            first_after(&storage.permanent, after),
            first_after(&storage.scoped, after),
        ) {
            (Some(a), Some(b)) => a.min(b),
            (a, b) => a.or(b)?,
        };

        let candidates = storage
            .permanent
            .get(&priority)
            .into_iter()
            .flatten()
            .chain(storage.scoped.get(&priority).into_iter().flatten());

        let mut level: Vec<SharedHandler<T, E>> = Vec::new();
        for handler in candidates {
            if !level.iter().any(|seen| Rc::ptr_eq(seen, handler)) {
                level.push(Rc::clone(handler));
            }
        }
        level.sort_by(|a, b| a.name().cmp(b.name()));

        Some((priority, level))
    }
}

impl<T, E> Default for Registry<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for Registry<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = self.storage.borrow();
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("permanent", &storage.permanent.keys().collect::<Vec<_>>())
            .field("scoped", &storage.scoped.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T, E> Handler<T, E> for Registry<T, E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, error: &E) -> bool {
        self.ordered_handlers().any(|h| h.matches(error))
    }

    /// Consult matching handlers in order until one decides.
    ///
    /// A handler that decides `Retry` is remembered, so the success report
    /// after the retry reaches that exact handler.
    fn handle(&self, decision: &mut Decision<T, E>) {
        self.retry_decider.borrow_mut().take();
        for handler in self.ordered_handlers() {
            if !handler.matches(decision.error()) {
                continue;
            }
            trace!(registry = %self.name, handler = handler.name(), "consulting handler");
            handler.handle(decision);
            if decision.is_decided() {
                decision.mark_decided_by(handler.name());
                if decision.action() == Some(Action::Retry) {
                    *self.retry_decider.borrow_mut() = Some(handler);
                }
                return;
            }
        }
        trace!(registry = %self.name, "no handler decided");
    }

    /// Forward to the handler that decided the retry.
    ///
    /// A nested registry receives the call and forwards it in turn.
    fn report_retry_success(&self, decision: &Decision<T, E>) {
        let decider = self.retry_decider.borrow_mut().take();
        if let Some(handler) = decider {
            trace!(registry = %self.name, handler = handler.name(), "reporting retry success");
            handler.report_retry_success(decision);
        }
    }
}

/// Lazy traversal returned by [`Registry::ordered_handlers`].
///
/// No registry borrow is held between calls to `next`, so handlers may
/// register or remove handlers while being iterated over.
pub struct OrderedHandlers<'r, T, E> {
    registry: &'r Registry<T, E>,
    last_priority: Option<Priority>,
    level: std::vec::IntoIter<SharedHandler<T, E>>,
}

impl<T, E> Iterator for OrderedHandlers<'_, T, E> {
    type Item = SharedHandler<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(handler) = self.level.next() {
                return Some(handler);
            }
            let (priority, level) = self.registry.level_after(self.last_priority)?;
            self.last_priority = Some(priority);
            self.level = level.into_iter();
        }
    }
}

/// Removes a scoped registration when dropped, if it added one.
struct ScopedRegistration<'r, T, E> {
    registry: &'r Registry<T, E>,
    handler: SharedHandler<T, E>,
    priority: Priority,
    added: bool,
}

impl<'r, T, E> ScopedRegistration<'r, T, E> {
    fn enter(registry: &'r Registry<T, E>, handler: SharedHandler<T, E>, priority: Priority) -> Self {
        let added = insert(
            &mut registry.storage.borrow_mut().scoped,
            priority,
            Rc::clone(&handler),
        );
        debug!(
            registry = %registry.name,
            handler = handler.name(),
            priority,
            added,
            "enter scoped handler"
        );
        Self {
            registry,
            handler,
            priority,
            added,
        }
    }
}

impl<T, E> Drop for ScopedRegistration<'_, T, E> {
    fn drop(&mut self) {
        if !self.added {
            return;
        }
        let removed = delete(
            &mut self.registry.storage.borrow_mut().scoped,
            self.priority,
            &self.handler,
        );
        debug!(
            registry = %self.registry.name,
            handler = self.handler.name(),
            priority = self.priority,
            removed,
            "exit scoped handler"
        );
    }
}
