//! Change notifications.
//!
//! Handlers are registered per variable. They are always invoked with no part of the DataSet
//! borrowed, so they may call back into it, including committing or rolling back the
//! transaction.
//!
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{
    changes::Changes,
    dataset::{DataSet, DataSetId},
    errors::Result,
    geom::Rectangle,
    variable::VariableId,
};

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Handle returned when registering a handler, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// What is about to change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeAction {
    PutData,
    Append,
    Metadata,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Decision {
    Cancel,
    Rollback,
}

/// Raised before a change is staged. Any handler may veto it.
///
/// For writes, the event is raised for the written variable and then for each variable derived
/// from it whose own affected region is not empty.
///
#[derive(Clone, Debug)]
pub struct ChangingEvent {
    pub dataset: DataSetId,
    pub variable: VariableId,
    pub action: ChangeAction,

    /// The variable's proposed shape once the change is staged
    pub shape: Vec<usize>,

    /// The region of the variable the change touches
    pub affected: Rectangle,

    decision: Option<Decision>,
}

impl ChangingEvent {
    pub(crate) fn new(
        dataset: DataSetId,
        variable: VariableId,
        action: ChangeAction,
        shape: Vec<usize>,
        affected: Rectangle,
    ) -> Self {
        Self {
            dataset,
            variable,
            action,
            shape,
            affected,
            decision: None,
        }
    }

    /// Abort the pending operation. Nothing is staged.
    pub fn cancel(&mut self) {
        self.decision = Some(Decision::Cancel);
    }

    /// Abort the pending operation and roll back the whole transaction.
    pub fn rollback(&mut self) {
        self.decision = Some(Decision::Rollback);
    }

    pub fn is_cancelled(&self) -> bool {
        self.decision.is_some()
    }

    pub(crate) fn wants_rollback(&self) -> bool {
        self.decision == Some(Decision::Rollback)
    }
}

/// Raised for every variable a successful commit changed.
#[derive(Clone, Debug)]
pub struct ChangedEvent {
    pub dataset: DataSetId,
    pub variable: VariableId,

    /// The changes as committed
    pub changes: Changes,
}

/// Raised for every variable whose pending changes were discarded.
#[derive(Clone, Debug)]
pub struct RolledBackEvent {
    pub dataset: DataSetId,
    pub variable: VariableId,
}

pub(crate) type ChangingHandler = Arc<dyn Fn(&mut ChangingEvent) + Send + Sync>;
pub(crate) type ChangedHandler = Arc<dyn Fn(&ChangedEvent) + Send + Sync>;
pub(crate) type RolledBackHandler = Arc<dyn Fn(&RolledBackEvent) + Send + Sync>;

/// The handlers registered on one variable.
#[derive(Clone, Default)]
pub(crate) struct Handlers {
    changing: Vec<(SubscriptionId, ChangingHandler)>,
    changed: Vec<(SubscriptionId, ChangedHandler)>,
    rolled_back: Vec<(SubscriptionId, RolledBackHandler)>,
}

impl Handlers {
    pub fn add_changing(&mut self, handler: ChangingHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.changing.push((id, handler));
        id
    }

    pub fn add_changed(&mut self, handler: ChangedHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.changed.push((id, handler));
        id
    }

    pub fn add_rolled_back(&mut self, handler: RolledBackHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.rolled_back.push((id, handler));
        id
    }

    /// Returns whether `id` was registered here.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.len();
        self.changing.retain(|(subscription, _)| *subscription != id);
        self.changed.retain(|(subscription, _)| *subscription != id);
        self.rolled_back.retain(|(subscription, _)| *subscription != id);

        self.len() != before
    }

    pub fn len(&self) -> usize {
        self.changing.len() + self.changed.len() + self.rolled_back.len()
    }

    pub fn changing(&self) -> Vec<ChangingHandler> {
        self.changing.iter().map(|(_, handler)| handler.clone()).collect()
    }

    pub fn changed(&self) -> Vec<ChangedHandler> {
        self.changed.iter().map(|(_, handler)| handler.clone()).collect()
    }

    pub fn rolled_back(&self) -> Vec<RolledBackHandler> {
        self.rolled_back
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect()
    }
}

/// Run handlers until one of them makes a decision.
pub(crate) fn raise_changing(handlers: &[ChangingHandler], event: &mut ChangingEvent) {
    for handler in handlers {
        handler(event);
        if event.is_cancelled() {
            break;
        }
    }
}

pub(crate) fn raise_changed(events: Vec<(Vec<ChangedHandler>, ChangedEvent)>) {
    for (handlers, event) in events {
        for handler in handlers {
            handler(&event);
        }
    }
}

pub(crate) fn raise_rolled_back(events: Vec<(Vec<RolledBackHandler>, RolledBackEvent)>) {
    for (handlers, event) in events {
        for handler in handlers {
            handler(&event);
        }
    }
}

impl DataSet {
    /// Register a handler raised before any change to `variable` is staged.
    pub fn on_changing<F>(&self, variable: VariableId, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&mut ChangingEvent) + Send + Sync + 'static,
    {
        self.with_mut(|inner| {
            let entry = inner.entry_mut(variable)?;
            Ok(entry.handlers.add_changing(Arc::new(handler)))
        })
    }

    /// Register a handler raised after a commit that changed `variable`.
    pub fn on_changed<F>(&self, variable: VariableId, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&ChangedEvent) + Send + Sync + 'static,
    {
        self.with_mut(|inner| {
            let entry = inner.entry_mut(variable)?;
            Ok(entry.handlers.add_changed(Arc::new(handler)))
        })
    }

    /// Register a handler raised after `variable`'s pending changes are rolled back.
    pub fn on_rolled_back<F>(&self, variable: VariableId, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&RolledBackEvent) + Send + Sync + 'static,
    {
        self.with_mut(|inner| {
            let entry = inner.entry_mut(variable)?;
            Ok(entry.handlers.add_rolled_back(Arc::new(handler)))
        })
    }

    /// Remove a handler. Returns `false` if it wasn't registered on this DataSet.
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> Result<bool> {
        self.with_mut(|inner| {
            Ok(inner
                .entries_mut()
                .any(|entry| entry.handlers.remove(subscription)))
        })
    }
}
