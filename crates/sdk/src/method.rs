//! Method references.
//!
//! Handlers are plain functions taking the component, optionally its state,
//! and zero to eight message arguments. The traits in this module are
//! implemented for every such function shape, so a reference like
//! `Counter::increase` can be used both to declare a handler and to address it
//! from a [`ComponentClient`](crate::client::ComponentClient).
//!
//! A reference is identified by the [`TypeId`] of its fn item, recorded in the
//! [`ComponentDescriptor`](crate::descriptor::ComponentDescriptor) when the
//! component is described. Wire names are derived from the fn path.

use std::any::{TypeId, type_name};

use crate::{
    codec::Message,
    descriptor::{ComponentKind, ComponentType},
    effect::{Effect, QueryEffect},
    error::ClientError,
    registry::ComponentRegistry,
};

/// The argument list of a handler.
///
/// Implemented for tuples of up to eight [`Message`]s. The arguments travel
/// as a single message: `()` for none, the argument itself for one, and a
/// tuple of the arguments otherwise.
pub trait Args: Send + 'static {
    type Message: Message;

    const ARITY: usize;

    fn from_message(message: Self::Message) -> Self;

    /// Codec names of the parameters, in order.
    fn param_types() -> Vec<String>;
}

impl Args for () {
    type Message = ();

    const ARITY: usize = 0;

    fn from_message(_message: ()) -> Self {}

    fn param_types() -> Vec<String> {
        Vec::new()
    }
}

impl<A1: Message> Args for (A1,) {
    type Message = A1;

    const ARITY: usize = 1;

    fn from_message(message: A1) -> Self {
        (message,)
    }

    fn param_types() -> Vec<String> {
        vec![A1::type_name().into_owned()]
    }
}

macro_rules! impl_args {
    ([$($ty:ident),*]) => {
        impl<$($ty: Message),*> Args for ($($ty,)*) {
            type Message = ($($ty,)*);

            const ARITY: usize = [$(stringify!($ty)),*].len();

            fn from_message(message: Self::Message) -> Self {
                message
            }

            fn param_types() -> Vec<String> {
                vec![$($ty::type_name().into_owned()),*]
            }
        }
    };
}

all_the_wide_tuples!(impl_args);

/// A command handler of a stateful component: `Fn(&C, &S, args..) -> Effect<R, U>`.
pub trait CommandHandler<C, S, A: Args>: Send + Sync + 'static {
    type Reply: Message;
    type Update: Send + 'static;

    fn call(&self, component: &C, state: &S, message: A::Message)
    -> Effect<Self::Reply, Self::Update>;
}

/// A handler of a stateless component: `Fn(&C, args..) -> Effect<R>`.
pub trait ActionHandler<C, A: Args>: Send + Sync + 'static {
    type Reply: Message;

    fn call(&self, component: &C, message: A::Message) -> Effect<Self::Reply>;
}

/// A view query handler: `Fn(&C, args..) -> QueryEffect<R>`.
pub trait QueryHandler<C, A: Args>: Send + Sync + 'static {
    type Reply: Message;

    fn call(&self, component: &C, message: A::Message) -> QueryEffect<Self::Reply>;
}

macro_rules! impl_handlers {
    ([$($ty:ident),*]) => {
        #[allow(non_snake_case, unused_variables)]
        impl<F, C, S, R, U, $($ty,)*> CommandHandler<C, S, ($($ty,)*)> for F
        where
            F: Fn(&C, &S, $($ty,)*) -> Effect<R, U> + Send + Sync + 'static,
            R: Message,
            U: Send + 'static,
            ($($ty,)*): Args,
        {
            type Reply = R;
            type Update = U;

            fn call(
                &self,
                component: &C,
                state: &S,
                message: <($($ty,)*) as Args>::Message,
            ) -> Effect<R, U> {
                let ($($ty,)*) = <($($ty,)*) as Args>::from_message(message);
                self(component, state, $($ty,)*)
            }
        }

        #[allow(non_snake_case, unused_variables)]
        impl<F, C, R, $($ty,)*> ActionHandler<C, ($($ty,)*)> for F
        where
            F: Fn(&C, $($ty,)*) -> Effect<R> + Send + Sync + 'static,
            R: Message,
            ($($ty,)*): Args,
        {
            type Reply = R;

            fn call(&self, component: &C, message: <($($ty,)*) as Args>::Message) -> Effect<R> {
                let ($($ty,)*) = <($($ty,)*) as Args>::from_message(message);
                self(component, $($ty,)*)
            }
        }

        #[allow(non_snake_case, unused_variables)]
        impl<F, C, R, $($ty,)*> QueryHandler<C, ($($ty,)*)> for F
        where
            F: Fn(&C, $($ty,)*) -> QueryEffect<R> + Send + Sync + 'static,
            R: Message,
            ($($ty,)*): Args,
        {
            type Reply = R;

            fn call(
                &self,
                component: &C,
                message: <($($ty,)*) as Args>::Message,
            ) -> QueryEffect<R> {
                let ($($ty,)*) = <($($ty,)*) as Args>::from_message(message);
                self(component, $($ty,)*)
            }
        }
    };
}

all_the_tuples!(impl_handlers);

/// Derives the wire name of a handler from its fn path.
///
/// `shop::ShoppingCart::add_item` becomes `add_item`. Returns `None` for
/// closures and generic fns, which must be declared with an explicit name.
pub fn derive_method_name<F>() -> Option<String> {
    let name = type_name::<F>().rsplit("::").next()?;
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    valid.then(|| name.to_string())
}

/// A method reference resolved against the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedMethod {
    pub component_type: ComponentType,
    pub component_id: Option<String>,
    pub method_name: String,
}

/// Resolves the fn item `F` of component `C` to its routable method.
///
/// Fails with [`ClientError::UnknownComponentMethod`] when `C` is not
/// registered, is registered as another kind, the fn was never declared, was
/// declared as ignored, or its argument count differs from the signature.
pub fn resolve<C: 'static, F: 'static>(
    registry: &ComponentRegistry,
    kind: ComponentKind,
    component_id: Option<String>,
    arity: usize,
) -> Result<ResolvedMethod, ClientError> {
    let method = || derive_method_name::<F>().unwrap_or_else(|| type_name::<F>().to_string());

    let descriptor = registry
        .descriptor_of::<C>()
        .filter(|descriptor| descriptor.kind() == kind)
        .ok_or_else(|| ClientError::unknown_method(type_name::<C>(), method()))?;
    let signature = descriptor
        .method_for_fn(TypeId::of::<F>())
        .filter(|signature| !signature.ignored && signature.params.len() == arity)
        .ok_or_else(|| ClientError::unknown_method(descriptor.component_id(), method()))?;

    Ok(ResolvedMethod {
        component_type: descriptor.component_type(),
        component_id,
        method_name: signature.name.clone(),
    })
}
