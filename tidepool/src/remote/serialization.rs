//! Pluggable payload serialization, keyed by type name.
//!
//! Every user message crossing a system boundary must be registered on
//! both sides. The sender looks the codec up by `TypeId`, the receiver by
//! the type name carried in the envelope.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{CodecError, RemoteError};
use crate::actor::{AnyMessage, DeadLetterResponse, PoisonPill};

/// Encodes and decodes serde types.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a message.
    fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode a message.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec, the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

type EncodeFn = Arc<dyn Fn(&AnyMessage) -> Result<Vec<u8>, CodecError> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<AnyMessage, CodecError> + Send + Sync>;

struct Encoder {
    type_name: String,
    encode: EncodeFn,
}

/// Registry of message types that may cross system boundaries.
pub struct SerializerRegistry {
    encoders: RwLock<HashMap<TypeId, Encoder>>,
    decoders: RwLock<HashMap<String, DecodeFn>>,
}

impl SerializerRegistry {
    /// Registry with the runtime's own marker messages registered.
    pub fn new() -> Self {
        let registry = Self {
            encoders: RwLock::new(HashMap::new()),
            decoders: RwLock::new(HashMap::new()),
        };
        registry.register::<PoisonPill>();
        registry.register::<DeadLetterResponse>();
        registry
    }

    /// Register `T` under its Rust type name with [`JsonCodec`].
    pub fn register<T>(&self)
    where
        T: Serialize + DeserializeOwned + Any + Send,
    {
        self.register_with::<T, _>(std::any::type_name::<T>(), JsonCodec);
    }

    /// Register `T` under an explicit name with a custom codec.
    pub fn register_with<T, C>(&self, type_name: impl Into<String>, codec: C)
    where
        T: Serialize + DeserializeOwned + Any + Send,
        C: MessageCodec,
    {
        let type_name = type_name.into();
        let encoder_codec = codec.clone();
        let encode: EncodeFn = Arc::new(move |message: &AnyMessage| match message.downcast_ref::<T>() {
            Some(value) => encoder_codec.encode(value),
            None => Err(CodecError::Encode(
                format!("payload is not a {}", std::any::type_name::<T>()).into(),
            )),
        });
        let decode: DecodeFn =
            Arc::new(move |bytes: &[u8]| codec.decode::<T>(bytes).map(AnyMessage::new));

        self.encoders.write().insert(
            TypeId::of::<T>(),
            Encoder {
                type_name: type_name.clone(),
                encode,
            },
        );
        self.decoders.write().insert(type_name, decode);
    }

    /// Whether a decoder exists for `type_name`.
    pub fn contains(&self, type_name: &str) -> bool {
        self.decoders.read().contains_key(type_name)
    }

    /// Encode a payload, returning its wire type name and bytes.
    pub fn serialize(&self, message: &AnyMessage) -> Result<(String, Vec<u8>), RemoteError> {
        let (type_name, encode) = {
            let encoders = self.encoders.read();
            let encoder = encoders
                .get(&message.payload_type_id())
                .ok_or_else(|| RemoteError::UnknownType {
                    type_name: message.type_name().to_string(),
                })?;
            (encoder.type_name.clone(), Arc::clone(&encoder.encode))
        };
        let bytes = encode(message)?;
        Ok((type_name, bytes))
    }

    /// Decode a payload received under `type_name`.
    pub fn deserialize(&self, type_name: &str, bytes: &[u8]) -> Result<AnyMessage, RemoteError> {
        let decode = self
            .decoders
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| RemoteError::UnknownType {
                type_name: type_name.to_string(),
            })?;
        Ok(decode(bytes)?)
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializerRegistry")
            .field("types", &self.decoders.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct PlaceOrder {
        sku: String,
        quantity: u32,
    }

    #[test]
    fn registered_types_cross_the_boundary() {
        let registry = SerializerRegistry::new();
        registry.register::<PlaceOrder>();
        let order = PlaceOrder {
            sku: "tea".into(),
            quantity: 2,
        };

        let (type_name, bytes) = registry
            .serialize(&AnyMessage::new(order.clone()))
            .expect("serialize");
        assert!(registry.contains(&type_name));
        let decoded = registry.deserialize(&type_name, &bytes).expect("deserialize");
        assert_eq!(decoded.downcast::<PlaceOrder>().expect("type"), order);
    }

    #[test]
    fn unregistered_types_are_rejected() {
        let registry = SerializerRegistry::new();
        let err = registry.serialize(&AnyMessage::new(7u64)).expect_err("unknown");
        assert!(matches!(err, RemoteError::UnknownType { .. }));
        let err = registry.deserialize("nope", b"{}").expect_err("unknown");
        assert!(matches!(err, RemoteError::UnknownType { type_name } if type_name == "nope"));
    }

    #[test]
    fn explicit_names_decouple_wire_name_from_rust_path() {
        let registry = SerializerRegistry::new();
        registry.register_with::<PlaceOrder, _>("orders.PlaceOrder", JsonCodec);
        let (type_name, _) = registry
            .serialize(&AnyMessage::new(PlaceOrder {
                sku: "x".into(),
                quantity: 1,
            }))
            .expect("serialize");
        assert_eq!(type_name, "orders.PlaceOrder");
    }

    #[test]
    fn corrupt_bytes_fail_to_decode() {
        let registry = SerializerRegistry::new();
        registry.register::<PlaceOrder>();
        let err = registry
            .deserialize(std::any::type_name::<PlaceOrder>(), b"not json")
            .expect_err("corrupt");
        assert!(matches!(err, RemoteError::Codec(CodecError::Decode(_))));
    }
}
