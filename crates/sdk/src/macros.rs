/// Implements [`Message`](crate::codec::Message) for types whose codec name is
/// a fixed literal.
///
/// # Example
///
/// ```rust,ignore
/// impl_message! {
///     bool => "bool",
///     String => "string",
/// }
/// ```
macro_rules! impl_message {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl $crate::codec::Message for $ty {
                fn type_name() -> ::std::borrow::Cow<'static, str> {
                    ::std::borrow::Cow::Borrowed($name)
                }
            }
        )*
    };
}

/// Invokes `$name!` once per argument list, from zero up to eight arguments.
///
/// Used to generate the tuple based handler and argument impls without one
/// hand-written impl per arity.
macro_rules! all_the_tuples {
    ($name:ident) => {
        $name!([]);
        $name!([A1]);
        $name!([A1, A2]);
        $name!([A1, A2, A3]);
        $name!([A1, A2, A3, A4]);
        $name!([A1, A2, A3, A4, A5]);
        $name!([A1, A2, A3, A4, A5, A6]);
        $name!([A1, A2, A3, A4, A5, A6, A7]);
        $name!([A1, A2, A3, A4, A5, A6, A7, A8]);
    };
}

/// Like [`all_the_tuples`], but only for argument lists of two or more.
macro_rules! all_the_wide_tuples {
    ($name:ident) => {
        $name!([A1, A2]);
        $name!([A1, A2, A3]);
        $name!([A1, A2, A3, A4]);
        $name!([A1, A2, A3, A4, A5]);
        $name!([A1, A2, A3, A4, A5, A6]);
        $name!([A1, A2, A3, A4, A5, A6, A7]);
        $name!([A1, A2, A3, A4, A5, A6, A7, A8]);
    };
}

/// Convenience macro for building [`Metadata`](crate::metadata::Metadata).
///
/// # Example
///
/// ```rust,ignore
/// let metadata = metadata! {
///     "traceparent" => "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
///     "tenant" => tenant_id,
/// };
/// ```
///
/// Expands to:
///
/// ```rust,ignore
/// Metadata::new()
///     .set("traceparent", "00-...")
///     .set("tenant", tenant_id)
/// ```
#[macro_export]
macro_rules! metadata {
    () => {
        $crate::metadata::Metadata::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        $crate::metadata::Metadata::new()
            $(.set($key, $value))+
    };
}
