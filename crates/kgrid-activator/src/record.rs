//! Knowledge Object records and their lifecycle status.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{ActivatorError, ActivatorResult};

/// Identifier of a Knowledge Object within a manifest.
///
/// Ids are opaque strings such as `"ko1"` or `"99999/fk4"`; the only rule is
/// that they are non-empty once trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct KoId(String);

impl<'de> Deserialize<'de> for KoId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl KoId {
    /// Create a new `KoId`.
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::Manifest`] if the id is blank.
    pub fn new(id: impl Into<String>) -> ActivatorResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ActivatorError::Manifest(
                "knowledge object id must not be empty".into(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a KO.
///
/// Moves forward only: `uninitialized` → `loaded` → `activated`. `error` can
/// be entered from any state and is never left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KoStatus {
    /// Listed in the manifest, nothing done yet.
    #[default]
    Uninitialized,
    /// Acquired and metadata accepted.
    Loaded,
    /// Every matching-engine endpoint is bound.
    Activated,
    /// A step failed; see the record's `error`.
    Error,
}

impl KoStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Loaded => 1,
            Self::Activated => 2,
            Self::Error => 3,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Error, _) => false,
            (_, Self::Error) => true,
            (current, next) => next.rank() > current.rank(),
        }
    }
}

impl fmt::Display for KoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Loaded => "loaded",
            Self::Activated => "activated",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Keys owned by the activator that KO metadata may not overwrite.
const RESERVED_KEYS: &[&str] = &["@id", "url", "status", "local_url", "error"];

/// One manifest entry plus everything learned about it during activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KoRecord {
    /// Unique id.
    #[serde(rename = "@id")]
    pub id: KoId,
    /// Source location, rewritten to the resolved location once acquired.
    pub url: String,
    /// Lifecycle state.
    #[serde(default)]
    pub status: KoStatus,
    /// Cache directory name under the cache root, or an absolute directory
    /// for directory sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_url: Option<String>,
    /// Declared schema version.
    #[serde(
        rename = "koio:kgrid",
        default,
        deserialize_with = "deserialize_version",
        skip_serializing_if = "Option::is_none"
    )]
    pub kgrid_version: Option<String>,
    /// Explicit deployment descriptor path, relative to the install dir.
    #[serde(
        rename = "hasDeploymentSpecification",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deployment_specification: Option<String>,
    /// Linked-data context.
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Service graph of newer-schema KOs.
    #[serde(
        rename = "koio:hasService",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub services: Option<Value>,
    /// Accumulated error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Remaining metadata, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl KoRecord {
    /// A fresh, uninitialized record.
    #[must_use]
    pub fn new(id: KoId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            status: KoStatus::Uninitialized,
            local_url: None,
            kgrid_version: None,
            deployment_specification: None,
            context: None,
            services: None,
            error: None,
            extra: Map::new(),
        }
    }

    /// Declared schema version; absent means `"1"`.
    #[must_use]
    pub fn version(&self) -> &str {
        self.kgrid_version.as_deref().unwrap_or("1")
    }

    /// Move to `next` if the transition is legal. Returns whether it applied.
    pub fn set_status(&mut self, next: KoStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Enter the terminal `error` state with `message`.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.status = KoStatus::Error;
    }

    /// Append an error message without changing status.
    pub fn push_error(&mut self, message: &str) {
        match &mut self.error {
            Some(existing) if !existing.is_empty() => {
                existing.push_str("; ");
                existing.push_str(message);
            },
            slot => *slot = Some(message.to_owned()),
        }
    }

    /// Copy KO metadata into the record. The manifest's id, url and the
    /// activator's bookkeeping fields are kept.
    pub fn apply_metadata(&mut self, metadata: &Map<String, Value>) {
        for (key, value) in metadata {
            match key.as_str() {
                k if RESERVED_KEYS.contains(&k) => {},
                "koio:kgrid" => self.kgrid_version = version_from_value(value),
                "hasDeploymentSpecification" => {
                    self.deployment_specification = value.as_str().map(str::to_owned);
                },
                "@context" => self.context = Some(value.clone()),
                "koio:hasService" => self.services = Some(value.clone()),
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                },
            }
        }
    }
}

/// Read a version tag that may be written as a string or a number.
pub(crate) fn version_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_version<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => version_from_value(&v)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("koio:kgrid must be a string or number")),
    }
}
