//! The effect algebra returned by component handlers.
//!
//! A handler never mutates state itself. It returns exactly one [`Effect`]
//! describing the outcome, and the router commits it:
//!
//! ```rust,ignore
//! fn increase(&self, state: &CounterState, by: i64) -> Effect<i64, CounterState> {
//!     if by <= 0 {
//!         return Effect::error("increase must be positive");
//!     }
//!     let value = state.value + by;
//!     update_state(CounterState { value }).then_reply(value)
//! }
//! ```

use std::{fmt, future::Future, marker::PhantomData};

use futures_util::{FutureExt, future::BoxFuture};

use crate::{
    error::{ErrorCode, ErrorReply},
    metadata::Metadata,
};

/// State update type of components without state.
///
/// Uninhabited, so a stateless handler cannot produce a state update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoState {}

/// The single outcome of a handler invocation.
///
/// `R` is the reply type. `U` is the state update: the new snapshot for
/// key-value entities and workflows, the events to persist for event sourced
/// entities, and [`NoState`] for actions.
pub enum Effect<R, U = NoState> {
    Reply {
        value: R,
        metadata: Metadata,
    },
    UpdateStateAndReply {
        update: U,
        value: R,
        metadata: Metadata,
    },
    Error(ErrorReply),
    DeleteEntityAndReply {
        value: R,
        metadata: Metadata,
    },
    /// The outcome is only known once the future resolves. The resolved
    /// effect is committed like any other.
    AsyncReply(BoxFuture<'static, Effect<R, U>>),
}

impl<R, U> Effect<R, U> {
    pub fn reply(value: R) -> Self {
        Effect::Reply {
            value,
            metadata: Metadata::new(),
        }
    }

    pub fn reply_with_metadata(value: R, metadata: Metadata) -> Self {
        Effect::Reply { value, metadata }
    }

    /// Reply with an error, leaving state untouched.
    ///
    /// The error is classified as [`ErrorCode::Rejected`].
    pub fn error(message: impl Into<String>) -> Self {
        Effect::Error(ErrorReply::rejected(message))
    }

    pub fn error_with_code(message: impl Into<String>, code: ErrorCode) -> Self {
        Effect::Error(ErrorReply::new(code, message))
    }

    /// Defer the outcome to a future resolving to another effect.
    pub fn async_effect(future: impl Future<Output = Effect<R, U>> + Send + 'static) -> Self {
        Effect::AsyncReply(future.boxed())
    }

    /// Reply with the output of a fallible future.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// fn check_out(&self, cart_id: String) -> Effect<Receipt> {
    ///     let cart = self.client.for_key_value_entity(cart_id);
    ///     let method = cart.method(ShoppingCart::check_out);
    ///     match method {
    ///         Ok(method) => Effect::async_reply(method.invoke_async(())),
    ///         Err(err) => Effect::Error(err.into()),
    ///     }
    /// }
    /// ```
    pub fn async_reply<E>(future: impl Future<Output = Result<R, E>> + Send + 'static) -> Self
    where
        R: Send + 'static,
        U: Send + 'static,
        E: Into<ErrorReply>,
    {
        Effect::AsyncReply(
            future
                .map(|result| match result {
                    Ok(value) => Effect::reply(value),
                    Err(err) => Effect::Error(err.into()),
                })
                .boxed(),
        )
    }

    /// Transforms the reply value, including the reply of a pending
    /// [`Effect::AsyncReply`].
    pub fn map_reply<T>(self, f: impl FnOnce(R) -> T + Send + 'static) -> Effect<T, U>
    where
        R: Send + 'static,
        T: Send + 'static,
        U: Send + 'static,
    {
        self.map_reply_boxed(Box::new(f))
    }

    fn map_reply_boxed<T>(self, f: Box<dyn FnOnce(R) -> T + Send>) -> Effect<T, U>
    where
        R: Send + 'static,
        T: Send + 'static,
        U: Send + 'static,
    {
        match self {
            Effect::Reply { value, metadata } => Effect::Reply {
                value: f(value),
                metadata,
            },
            Effect::UpdateStateAndReply {
                update,
                value,
                metadata,
            } => Effect::UpdateStateAndReply {
                update,
                value: f(value),
                metadata,
            },
            Effect::Error(err) => Effect::Error(err),
            Effect::DeleteEntityAndReply { value, metadata } => Effect::DeleteEntityAndReply {
                value: f(value),
                metadata,
            },
            Effect::AsyncReply(future) => {
                Effect::AsyncReply(future.map(move |effect| effect.map_reply_boxed(f)).boxed())
            }
        }
    }

    /// Name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Effect::Reply { .. } => "reply",
            Effect::UpdateStateAndReply { .. } => "update_state_and_reply",
            Effect::Error(_) => "error",
            Effect::DeleteEntityAndReply { .. } => "delete_entity_and_reply",
            Effect::AsyncReply(_) => "async_reply",
        }
    }
}

impl<R: fmt::Debug, U: fmt::Debug> fmt::Debug for Effect<R, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Reply { value, metadata } => f
                .debug_struct("Reply")
                .field("value", value)
                .field("metadata", metadata)
                .finish(),
            Effect::UpdateStateAndReply {
                update,
                value,
                metadata,
            } => f
                .debug_struct("UpdateStateAndReply")
                .field("update", update)
                .field("value", value)
                .field("metadata", metadata)
                .finish(),
            Effect::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Effect::DeleteEntityAndReply { value, metadata } => f
                .debug_struct("DeleteEntityAndReply")
                .field("value", value)
                .field("metadata", metadata)
                .finish(),
            Effect::AsyncReply(_) => f.write_str("AsyncReply(..)"),
        }
    }
}

/// Replace the state snapshot. Finish with [`UpdateState::then_reply`].
pub fn update_state<S>(state: S) -> UpdateState<S> {
    UpdateState(state)
}

/// Persist one event. Finish with [`Persist::then_reply`].
pub fn persist<E>(event: E) -> Persist<E> {
    Persist(vec![event])
}

/// Persist a batch of events, applied in order.
pub fn persist_all<E>(events: impl IntoIterator<Item = E>) -> Persist<E> {
    Persist(events.into_iter().collect())
}

/// Delete the entity. Finish with [`DeleteEntity::then_reply`].
pub fn delete_entity() -> DeleteEntity {
    DeleteEntity(())
}

#[must_use = "an update has no effect until `then_reply` is called"]
#[derive(Debug)]
pub struct UpdateState<S>(S);

impl<S> UpdateState<S> {
    pub fn then_reply<R>(self, value: R) -> Effect<R, S> {
        self.then_reply_with_metadata(value, Metadata::new())
    }

    pub fn then_reply_with_metadata<R>(self, value: R, metadata: Metadata) -> Effect<R, S> {
        Effect::UpdateStateAndReply {
            update: self.0,
            value,
            metadata,
        }
    }
}

#[must_use = "events are not persisted until `then_reply` is called"]
#[derive(Debug)]
pub struct Persist<E>(Vec<E>);

impl<E> Persist<E> {
    /// Append another event to the batch.
    pub fn and(mut self, event: E) -> Self {
        self.0.push(event);
        self
    }

    pub fn then_reply<R>(self, value: R) -> Effect<R, Vec<E>> {
        self.then_reply_with_metadata(value, Metadata::new())
    }

    pub fn then_reply_with_metadata<R>(self, value: R, metadata: Metadata) -> Effect<R, Vec<E>> {
        Effect::UpdateStateAndReply {
            update: self.0,
            value,
            metadata,
        }
    }
}

#[must_use = "the entity is not deleted until `then_reply` is called"]
#[derive(Debug)]
pub struct DeleteEntity(());

impl DeleteEntity {
    pub fn then_reply<R, U>(self, value: R) -> Effect<R, U> {
        self.then_reply_with_metadata(value, Metadata::new())
    }

    pub fn then_reply_with_metadata<R, U>(self, value: R, metadata: Metadata) -> Effect<R, U> {
        Effect::DeleteEntityAndReply { value, metadata }
    }
}

/// Outcome of a view query handler.
///
/// The handler does not compute rows itself: on [`QueryEffect::query_result`]
/// the router evaluates the query declared for the method against the view's
/// table and replies with the result.
#[must_use]
pub struct QueryEffect<R> {
    outcome: Result<(), ErrorReply>,
    _reply: PhantomData<fn() -> R>,
}

impl<R> QueryEffect<R> {
    pub fn query_result() -> Self {
        Self {
            outcome: Ok(()),
            _reply: PhantomData,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::error_reply(ErrorReply::rejected(message))
    }

    pub fn error_reply(err: ErrorReply) -> Self {
        Self {
            outcome: Err(err),
            _reply: PhantomData,
        }
    }

    pub(crate) fn into_outcome(self) -> Result<(), ErrorReply> {
        self.outcome
    }
}

impl<R> fmt::Debug for QueryEffect<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryEffect")
            .field("outcome", &self.outcome)
            .finish()
    }
}

/// Outcome of a view table updater for one source entity.
#[derive(Clone, Debug, PartialEq)]
pub enum RowEffect<T> {
    UpdateRow(T),
    DeleteRow,
    Ignore,
}

impl<T> RowEffect<T> {
    pub fn update_row(row: T) -> Self {
        RowEffect::UpdateRow(row)
    }

    pub fn delete_row() -> Self {
        RowEffect::DeleteRow
    }

    pub fn ignore() -> Self {
        RowEffect::Ignore
    }
}
