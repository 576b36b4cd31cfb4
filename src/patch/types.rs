use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::patch::identifier::VersionIdentifier;

/// A published build. Append-only: never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub version: VersionIdentifier,
    /// Download location of the patch archive
    pub url: String,
    /// Integrity hash clients verify the download against
    pub hash: String,
    pub published_at: DateTime<Utc>,
}

impl PatchRecord {
    pub fn new(
        version: VersionIdentifier,
        url: impl Into<String>,
        hash: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version,
            url: url.into(),
            hash: hash.into(),
            published_at,
        }
    }
}

/// One element of a lookup response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchEntry {
    /// `major.minor.patch`
    pub name: String,
    pub md5: String,
    pub url: String,
}

impl From<&PatchRecord> for PatchEntry {
    fn from(record: &PatchRecord) -> Self {
        Self {
            name: record.version.name(),
            md5: record.hash.clone(),
            url: record.url.clone(),
        }
    }
}

/// A lookup result, kept as the serialized JSON array clients receive.
///
/// Cache hits hand this body out as is, without re-encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchList(Bytes);

impl PatchList {
    /// `entries` must already be in ascending version order
    pub fn from_entries(entries: &[PatchEntry]) -> Result<Self, serde_json::Error> {
        Ok(Self(Bytes::from(serde_json::to_vec(entries)?)))
    }

    /// Wrap a body previously produced by [`PatchList::from_entries`]
    pub fn from_body(body: impl Into<Bytes>) -> Self {
        Self(body.into())
    }

    pub fn body(&self) -> &Bytes {
        &self.0
    }

    pub fn into_body(self) -> Bytes {
        self.0
    }

    /// Decode the entries back out of the body
    pub fn entries(&self) -> Result<Vec<PatchEntry>, serde_json::Error> {
        serde_json::from_slice(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::identifier::Platform;
    use serde_json::json;

    #[test]
    fn patch_entry_from_record_formats_numeric_name() {
        let record = PatchRecord::new(
            VersionIdentifier::new(Platform::Windows, 1, 10, 0),
            "https://cdn.example/1.10.0.tar.gz",
            "d41d8cd98f00b204e9800998ecf8427e",
            Utc::now(),
        );

        let entry = PatchEntry::from(&record);

        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({
                "name": "1.10.0",
                "md5": "d41d8cd98f00b204e9800998ecf8427e",
                "url": "https://cdn.example/1.10.0.tar.gz"
            })
        );
    }

    #[test]
    fn patch_list_body_is_the_response_array() {
        let entries = vec![PatchEntry {
            name: "1.2.3".to_string(),
            md5: "h".to_string(),
            url: "u".to_string(),
        }];

        let list = PatchList::from_entries(&entries).unwrap();

        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(list.body()).unwrap(),
            json!([{"name": "1.2.3", "md5": "h", "url": "u"}])
        );
        assert_eq!(list.entries().unwrap(), entries);
        assert_eq!(PatchList::from_body(list.body().clone()), list);
    }

    #[test]
    fn empty_patch_list_is_an_empty_array() {
        let list = PatchList::from_entries(&[]).unwrap();
        assert_eq!(list.body().as_ref(), b"[]");
    }
}
