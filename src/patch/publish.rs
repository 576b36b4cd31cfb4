//! Register new patch releases

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::patch::cache::LookupCache;
use crate::patch::catalog::PatchCatalog;
use crate::patch::error::PublishError;
use crate::patch::identifier::{MAX_COMPONENT, Platform, VersionIdentifier, parse_component};
use crate::patch::types::PatchRecord;

/// Publisher submission as received on the wire.
///
/// Fields are kept loosely typed so that a bad credential is reported as
/// such even when the rest of the body is malformed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PublishRequest {
    pub auth_token: Value,
    pub url: Value,
    pub os: Value,
    pub major: Value,
    pub minor: Value,
    pub patch: Value,
    pub hash: Value,
}

/// A submission that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPatch {
    pub version: VersionIdentifier,
    pub url: String,
    pub hash: String,
}

impl PublishRequest {
    pub fn validate(&self) -> Result<ValidatedPatch, PublishError> {
        let os = string_field("os", &self.os)?;
        let platform = os
            .parse::<Platform>()
            .map_err(|_| PublishError::Validation(format!("unknown os {os:?}")))?;

        let version = VersionIdentifier::new(
            platform,
            numeric_field("major", &self.major)?,
            numeric_field("minor", &self.minor)?,
            numeric_field("patch", &self.patch)?,
        );

        Ok(ValidatedPatch {
            version,
            url: string_field("url", &self.url)?,
            hash: string_field("hash", &self.hash)?,
        })
    }
}

fn string_field(name: &str, value: &Value) -> Result<String, PublishError> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Null => Err(PublishError::Validation(format!("missing {name}"))),
        _ => Err(PublishError::Validation(format!(
            "{name} must be a non-empty string"
        ))),
    }
}

/// Accepts a JSON integer or a string of decimal digits, nothing else
fn numeric_field(name: &str, value: &Value) -> Result<u64, PublishError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().filter(|v| *v <= MAX_COMPONENT),
        Value::String(s) => parse_component(s),
        Value::Null => return Err(PublishError::Validation(format!("missing {name}"))),
        _ => None,
    };

    parsed.ok_or_else(|| {
        PublishError::Validation(format!("{name} must be a non-negative integer, got {value}"))
    })
}

/// Timing depends only on the lengths, not on where the first mismatch is
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

pub struct PublishService {
    catalog: Arc<dyn PatchCatalog>,
    cache: Arc<dyn LookupCache>,
    secret: Option<String>,
}

impl PublishService {
    /// `secret: None` (or an empty secret) rejects every submission
    pub fn new(
        catalog: Arc<dyn PatchCatalog>,
        cache: Arc<dyn LookupCache>,
        secret: Option<String>,
    ) -> Self {
        Self {
            catalog,
            cache,
            secret,
        }
    }

    fn authorize(&self, token: Option<&str>) -> Result<(), PublishError> {
        match (self.secret.as_deref(), token) {
            (Some(secret), Some(token))
                if !secret.is_empty() && constant_time_eq(secret.as_bytes(), token.as_bytes()) =>
            {
                Ok(())
            }
            _ => Err(PublishError::Unauthorized),
        }
    }

    /// Authorize, validate, append, then invalidate the lookup cache.
    ///
    /// The cache is invalidated after the append commits and before this
    /// returns, so any lookup started after a successful publish sees it.
    pub fn publish(&self, request: &PublishRequest) -> Result<PatchRecord, PublishError> {
        self.authorize(request.auth_token.as_str())
            .inspect_err(|_| warn!("Rejected publish with invalid credential"))?;

        let patch = request
            .validate()
            .inspect_err(|e| warn!("Rejected publish: {}", e))?;

        let record = PatchRecord::new(patch.version, patch.url, patch.hash, Utc::now());

        self.catalog
            .append(&record)
            .inspect_err(|e| error!("Failed to add patch {}: {}", record.version, e))?;

        // The generation bump inside invalidate_all already hides old entries;
        // a failure here only leaves unreachable rows behind
        let _ = self
            .cache
            .invalidate_all()
            .inspect_err(|e| warn!("Failed to clear lookup cache: {}", e));

        info!("Published patch {} at {}", record.version, record.url);
        Ok(record)
    }
}
