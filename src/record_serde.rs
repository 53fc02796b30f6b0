//! Serde helpers shared by the persisted record types.

/// Lowercase hex representation of opaque key bytes
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    /// Takes an owned string, borrowed slices are not available from every
    /// format (`ciborium` decodes text into owned buffers)
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        hex::decode(string).map_err(serde::de::Error::custom)
    }
}
