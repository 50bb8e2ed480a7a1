use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The sealed secrets of a vault, keyed by name.
///
/// Values are opaque tokens; this table never sees plaintext.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct SecretTable {
    secrets: BTreeMap<String, SecretEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SecretEntry {
    #[serde(with = "b64")]
    token: Vec<u8>,
    updated: String,
}

impl SecretEntry {
    pub(crate) fn new(token: Vec<u8>) -> Self {
        Self {
            token,
            updated: Local::now().to_rfc3339(),
        }
    }

    /// IV, ciphertext and tag of the sealed value.
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    pub fn updated(&self) -> &str {
        &self.updated
    }

    #[cfg(test)]
    pub(crate) fn token_mut(&mut self) -> &mut Vec<u8> {
        &mut self.token
    }
}

impl SecretTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry stored under `name`.
    pub fn upsert(&mut self, name: &str, token: Vec<u8>) {
        self.secrets
            .insert(name.to_string(), SecretEntry::new(token));
    }

    pub fn get(&self, name: &str) -> Option<&SecretEntry> {
        self.secrets.get(name)
    }

    #[cfg(test)]
    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut SecretEntry> {
        self.secrets.get_mut(name)
    }

    /// Returns `true` if an entry was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.secrets.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.secrets.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.secrets.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &SecretEntry)> {
        self.secrets.iter()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Most recent update time across all entries.
    pub fn last_updated(&self) -> Option<DateTime<FixedOffset>> {
        self.secrets
            .values()
            .filter_map(|entry| DateTime::parse_from_rfc3339(entry.updated()).ok())
            .max()
    }
}

mod b64 {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}
