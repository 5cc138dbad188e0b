//! Body codec.
//!
//! The dispatch engine never looks inside a body. Handlers that want
//! structured values go through a [`Codec`]; [`JsonCodec`] is the one the
//! context responders use.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::response::ContentType;

/// Marshals values to and from wire bytes.
pub trait Codec: Send + Sync + 'static {
    fn content_type(&self) -> ContentType;

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// UTF-8 JSON via `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> ContentType {
        ContentType::Json
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        name: String,
        age: u8,
    }

    #[test]
    fn decodes_into_typed_shape() {
        let user: User = JsonCodec.decode(br#"{"name":"ana","age":31}"#).unwrap();
        assert_eq!(user, User { name: "ana".into(), age: 31 });
    }

    #[test]
    fn decode_reports_shape_mismatch() {
        let err = JsonCodec.decode::<User>(br#"{"name":"ana"}"#).unwrap_err();
        assert!(err.to_string().starts_with("codec:"));
    }
}
