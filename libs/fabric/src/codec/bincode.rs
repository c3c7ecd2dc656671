use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::error::{Error, Result};

/// Bincode codec for binary serialization
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| Error::Codec(e.to_string()))
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| Error::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuple_of_strings_decodes() {
        let codec = BincodeCodec;
        let bytes = codec.encode(&("hello".to_string(), "world".to_string())).unwrap();
        let (a, b): (String, String) = codec.decode(&bytes).unwrap();
        assert_eq!(a, "hello");
        assert_eq!(b, "world");
    }

    #[test]
    fn truncated_input_is_codec_error() {
        let codec = BincodeCodec;
        let bytes = codec.encode(&"hello".to_string()).unwrap();
        let result: Result<String> = codec.decode(&bytes[..3]);
        assert!(matches!(result, Err(Error::Codec(_))));
    }
}
