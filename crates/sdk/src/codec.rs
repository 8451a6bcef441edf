//! Message codec.
//!
//! Payloads travel as an [`EncodedPayload`]: a self-describing type url plus
//! the JSON encoded bytes of the value. Every Rust type that crosses the wire
//! implements [`Message`], which pins its codec name statically, and must be
//! registered in a [`JsonCodec`] before it can be encoded or decoded.
//! Registration happens once at startup through the
//! [`RegistryBuilder`](crate::registry::RegistryBuilder), so a call can only fail
//! to decode when its bytes are genuinely malformed.

use std::{
    any::{TypeId, type_name},
    borrow::Cow,
    collections::{BTreeMap, HashMap},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{DecodeError, EncodeError, TypeConflict};

/// Prefix shared by every type url produced by [`JsonCodec`].
pub const TYPE_URL_PREFIX: &str = "json.keel.dev/";

/// A type that can be carried in an [`EncodedPayload`].
///
/// Usually derived:
///
/// ```rust,ignore
/// #[derive(Message, Serialize, Deserialize)]
/// #[message_type("AddLineItem")]
/// struct LineItem {
///     product_id: String,
///     quantity: u32,
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The codec name of this type, unique across a registry.
    fn type_name() -> Cow<'static, str>;

    /// The type url written to the wire.
    fn type_url() -> String {
        format!("{TYPE_URL_PREFIX}{}", Self::type_name())
    }
}

impl_message! {
    () => "unit",
    bool => "bool",
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    f32 => "f32",
    f64 => "f64",
    char => "char",
    String => "string",
    Value => "json",
}

impl<T: Message> Message for Option<T> {
    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("option<{}>", T::type_name()))
    }
}

impl<T: Message> Message for Vec<T> {
    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("list<{}>", T::type_name()))
    }
}

impl<T: Message> Message for BTreeMap<String, T> {
    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("map<{}>", T::type_name()))
    }
}

macro_rules! impl_message_tuple {
    ([$($ty:ident),*]) => {
        impl<$($ty: Message),*> Message for ($($ty,)*) {
            fn type_name() -> Cow<'static, str> {
                let names = [$($ty::type_name()),*];
                Cow::Owned(format!("tuple<{}>", names.join(",")))
            }
        }
    };
}

all_the_wide_tuples!(impl_message_tuple);

/// An encoded value plus the type url needed to decode it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedPayload {
    pub type_url: String,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl EncodedPayload {
    /// The type name portion of the type url.
    pub fn type_name(&self) -> &str {
        self.type_url
            .strip_prefix(TYPE_URL_PREFIX)
            .unwrap_or(&self.type_url)
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

#[derive(Clone, Copy, Debug)]
struct RegisteredType {
    type_id: TypeId,
    rust_type: &'static str,
}

/// Signature of a deferred [`JsonCodec::register`] call.
pub(crate) type RegisterFn = fn(&mut JsonCodec) -> Result<String, TypeConflict>;

/// JSON codec with a table of registered type urls.
#[derive(Clone, Debug, Default)]
pub struct JsonCodec {
    types: HashMap<String, RegisteredType>,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under its type url, returning the url.
    ///
    /// Registering the same type twice is a no-op. Fails when another Rust
    /// type already claimed the url.
    pub fn register<T: Message>(&mut self) -> Result<String, TypeConflict> {
        let type_url = T::type_url();
        let registered = RegisteredType {
            type_id: TypeId::of::<T>(),
            rust_type: type_name::<T>(),
        };
        match self.types.get(&type_url) {
            Some(existing) if existing.type_id == registered.type_id => Ok(type_url),
            Some(existing) => Err(TypeConflict {
                type_url,
                existing: existing.rust_type,
                conflicting: registered.rust_type,
            }),
            None => {
                self.types.insert(type_url.clone(), registered);
                Ok(type_url)
            }
        }
    }

    pub fn is_registered<T: Message>(&self) -> bool {
        self.types
            .get(&T::type_url())
            .is_some_and(|registered| registered.type_id == TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn encode<T: Message>(&self, value: &T) -> Result<EncodedPayload, EncodeError> {
        if !self.is_registered::<T>() {
            return Err(EncodeError::UnregisteredType(type_name::<T>().to_string()));
        }
        let type_url = T::type_url();
        let bytes = serde_json::to_vec(value).map_err(|err| EncodeError::Serialization {
            type_url: type_url.clone(),
            message: err.to_string(),
        })?;

        Ok(EncodedPayload { type_url, bytes })
    }

    pub fn decode<T: Message>(&self, payload: &EncodedPayload) -> Result<T, DecodeError> {
        let registered = self.lookup(payload)?;
        if registered.type_id != TypeId::of::<T>() {
            return Err(DecodeError::TypeMismatch {
                expected: T::type_url(),
                found: payload.type_url.clone(),
            });
        }

        serde_json::from_slice(&payload.bytes).map_err(|err| DecodeError::Malformed {
            type_url: payload.type_url.clone(),
            message: err.to_string(),
        })
    }

    /// Decodes a payload of any registered type into a JSON value.
    pub fn decode_value(&self, payload: &EncodedPayload) -> Result<Value, DecodeError> {
        self.lookup(payload)?;
        serde_json::from_slice(&payload.bytes).map_err(|err| DecodeError::Malformed {
            type_url: payload.type_url.clone(),
            message: err.to_string(),
        })
    }

    fn lookup(&self, payload: &EncodedPayload) -> Result<&RegisteredType, DecodeError> {
        self.types
            .get(&payload.type_url)
            .ok_or_else(|| DecodeError::UnknownType(payload.type_url.clone()))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::Message;

    #[derive(Clone, Debug, PartialEq, Message, Serialize, Deserialize)]
    struct LineItem {
        product_id: String,
        quantity: u32,
    }

    #[derive(Clone, Debug, PartialEq, Message, Serialize, Deserialize)]
    #[message_type("LineItem")]
    struct Impostor {
        sku: String,
    }

    fn codec() -> JsonCodec {
        let mut codec = JsonCodec::new();
        codec.register::<LineItem>().unwrap();
        codec.register::<(String, i64)>().unwrap();
        codec.register::<Option<u32>>().unwrap();
        codec
    }

    #[test]
    fn derived_and_composite_type_names() {
        assert_eq!(LineItem::type_name(), "LineItem");
        assert_eq!(LineItem::type_url(), "json.keel.dev/LineItem");
        assert_eq!(<(String, i64)>::type_name(), "tuple<string,i64>");
        assert_eq!(<Vec<Option<u8>>>::type_name(), "list<option<u8>>");
        assert_eq!(<()>::type_name(), "unit");
    }

    #[test]
    fn round_trips_registered_types() {
        let codec = codec();
        let item = LineItem {
            product_id: "tv".to_string(),
            quantity: 2,
        };

        let payload = codec.encode(&item).unwrap();
        assert_eq!(payload.type_url, "json.keel.dev/LineItem");
        assert_eq!(payload.type_name(), "LineItem");
        assert_eq!(codec.decode::<LineItem>(&payload).unwrap(), item);

        let pair = ("tv".to_string(), -3_i64);
        let payload = codec.encode(&pair).unwrap();
        assert_eq!(codec.decode::<(String, i64)>(&payload).unwrap(), pair);

        let payload = codec.encode(&None::<u32>).unwrap();
        assert_eq!(codec.decode::<Option<u32>>(&payload).unwrap(), None);
    }

    #[test]
    fn encoding_an_unregistered_type_fails() {
        let err = codec().encode(&42_u64).unwrap_err();
        assert!(matches!(err, EncodeError::UnregisteredType(name) if name == "u64"));
    }

    #[test]
    fn decoding_checks_the_type_url() {
        let codec = codec();
        let payload = codec.encode(&Some(3_u32)).unwrap();

        let err = codec.decode::<LineItem>(&payload).unwrap_err();
        assert!(matches!(err, DecodeError::TypeMismatch { .. }));

        let unknown = EncodedPayload {
            type_url: "json.keel.dev/Nope".to_string(),
            bytes: b"{}".to_vec(),
        };
        assert_eq!(
            codec.decode::<LineItem>(&unknown).unwrap_err(),
            DecodeError::UnknownType("json.keel.dev/Nope".to_string())
        );
    }

    #[test]
    fn decoding_malformed_bytes_fails() {
        let payload = EncodedPayload {
            type_url: LineItem::type_url(),
            bytes: b"{\"product_id\":".to_vec(),
        };
        assert!(matches!(
            codec().decode::<LineItem>(&payload),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn conflicting_type_urls_are_rejected() {
        let mut codec = codec();
        assert!(codec.register::<LineItem>().is_ok());

        let err = codec.register::<Impostor>().unwrap_err();
        assert_eq!(err.type_url, "json.keel.dev/LineItem");
        assert!(err.conflicting.ends_with("Impostor"));
    }

    #[test]
    fn payload_bytes_are_base64_on_the_wire() {
        let payload = codec().encode(&Some(7_u32)).unwrap();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type_url"], "json.keel.dev/option<u32>");
        assert_eq!(json["bytes"], "Nw==");

        let back: EncodedPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }
}
