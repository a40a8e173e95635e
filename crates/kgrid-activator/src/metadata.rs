//! Metadata and schema-version adapter.
//!
//! Two schema generations coexist. Version `"1"` KOs point straight at a
//! deployment descriptor; version `"2"` KOs describe a service graph whose
//! implementation nodes must be matched against this activator's engine
//! family and expanded against a linked-data context to find the
//! implementation directory. [`DeploymentLocator`] captures both.

use std::path::{Path, PathBuf};

use kgrid_config::ActivatorSection;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ActivatorError, ActivatorResult};
use crate::fetch::HttpFetcher;
use crate::linked_data::LinkedDataExpander;
use crate::record::{KoRecord, version_from_value};

/// Metadata file name inside an install directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Default deployment descriptor file name.
pub const DEPLOYMENT_FILE: &str = "deployment.yaml";

/// `@type` marking an implementation node as an activation spec.
pub const ACTIVATION_SPEC_TYPE: &str = "https://kgrid.org/specs/activationSpec.html#object";

/// Schema version that uses the service graph.
const SERVICE_GRAPH_VERSION: &str = "2";

/// Where to find a KO's deployment descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentLocator {
    /// Legacy schema: a fixed descriptor path.
    Direct {
        /// Descriptor file.
        descriptor: PathBuf,
        /// Base directory for artifact paths.
        artifact_root: PathBuf,
    },
    /// Newer schema: implementation nodes still to be expanded.
    ServiceGraph {
        /// Matching implementation nodes, in document order.
        candidates: Vec<Value>,
        /// The KO's `@context`, if any.
        context: Option<Value>,
        /// Install directory, used as `@base`.
        install_dir: PathBuf,
    },
    /// Nothing for this engine to bind.
    None,
}

/// A located deployment descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDeployment {
    /// Descriptor file.
    pub descriptor: PathBuf,
    /// Base directory for artifact paths.
    pub artifact_root: PathBuf,
}

/// Metadata read from an install directory plus its locator.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptedKo {
    /// The parsed `metadata.json`.
    pub metadata: Map<String, Value>,
    /// Where the deployment descriptor lives.
    pub locator: DeploymentLocator,
}

/// Reads KO metadata and decides how to locate its deployment.
#[derive(Debug, Clone)]
pub struct MetadataAdapter {
    supported_versions: Vec<String>,
    engine_family: String,
}

impl MetadataAdapter {
    /// Create an adapter accepting `supported_versions` and matching
    /// implementations of `engine_family`.
    #[must_use]
    pub fn new(supported_versions: Vec<String>, engine_family: impl Into<String>) -> Self {
        Self {
            supported_versions,
            engine_family: engine_family.into(),
        }
    }

    /// Build from the `[activator]` config section.
    #[must_use]
    pub fn from_config(config: &ActivatorSection) -> Self {
        Self::new(config.supported_versions.clone(), config.engine_family.clone())
    }

    /// Read and validate `<install_dir>/metadata.json`.
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::MissingSpecificationFile`] if the file is
    /// missing or is not a JSON object, and
    /// [`ActivatorError::UnsupportedVersion`] for versions outside the
    /// supported set.
    pub fn adapt(&self, ko_id: &str, install_dir: &Path) -> ActivatorResult<AdaptedKo> {
        let path = install_dir.join(METADATA_FILE);
        let missing = |message: String| ActivatorError::MissingSpecificationFile {
            path: path.clone(),
            message,
        };

        let text = std::fs::read_to_string(&path).map_err(|e| missing(e.to_string()))?;
        let value: Value =
            serde_json::from_str(&text).map_err(|e| missing(format!("invalid JSON: {e}")))?;
        let Value::Object(metadata) = value else {
            return Err(missing("metadata must be a JSON object".into()));
        };

        let version = match metadata.get("koio:kgrid") {
            None | Some(Value::Null) => "1".to_owned(),
            Some(v) => version_from_value(v).unwrap_or_else(|| v.to_string()),
        };
        if !self.supported_versions.iter().any(|s| *s == version) {
            return Err(ActivatorError::UnsupportedVersion {
                ko_id: ko_id.to_owned(),
                version,
            });
        }

        let locator = self.locate(
            &version,
            metadata.get("hasDeploymentSpecification").and_then(Value::as_str),
            metadata.get("koio:hasService"),
            metadata.get("@context"),
            install_dir,
        );
        debug!(ko_id, version = %version, "metadata accepted");
        Ok(AdaptedKo { metadata, locator })
    }

    /// Rebuild the locator from a record that already carries its metadata.
    #[must_use]
    pub fn locator_for(&self, record: &KoRecord, install_dir: &Path) -> DeploymentLocator {
        self.locate(
            record.version(),
            record.deployment_specification.as_deref(),
            record.services.as_ref(),
            record.context.as_ref(),
            install_dir,
        )
    }

    fn locate(
        &self,
        version: &str,
        deployment_specification: Option<&str>,
        services: Option<&Value>,
        context: Option<&Value>,
        install_dir: &Path,
    ) -> DeploymentLocator {
        if version != SERVICE_GRAPH_VERSION {
            return DeploymentLocator::Direct {
                descriptor: install_dir.join(deployment_specification.unwrap_or(DEPLOYMENT_FILE)),
                artifact_root: install_dir.to_path_buf(),
            };
        }

        let candidates = self.candidates(services);
        if candidates.is_empty() {
            return DeploymentLocator::None;
        }
        DeploymentLocator::ServiceGraph {
            candidates,
            context: context.cloned(),
            install_dir: install_dir.to_path_buf(),
        }
    }

    /// Implementation nodes of `API` services that target this engine family.
    fn candidates(&self, services: Option<&Value>) -> Vec<Value> {
        let Some(services) = services else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for service in as_list(services) {
            if !type_matches(service.get("@type"), "API", true) {
                continue;
            }
            let Some(implementations) = service.get("implementedBy") else {
                continue;
            };
            for implementation in as_list(implementations) {
                let ty = implementation.get("@type");
                if type_matches(ty, ACTIVATION_SPEC_TYPE, false)
                    && type_matches(ty, &self.engine_family, false)
                {
                    out.push(implementation.clone());
                }
            }
        }
        out
    }
}

fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    }
}

/// Whether an `@type` value names `wanted`. Arrays match by element;
/// a single string matches exactly when `exact`, otherwise by substring.
fn type_matches(ty: Option<&Value>, wanted: &str, exact: bool) -> bool {
    match ty {
        Some(Value::String(s)) if exact => s == wanted,
        Some(Value::String(s)) => s.contains(wanted),
        Some(Value::Array(items)) => items.iter().any(|t| t.as_str() == Some(wanted)),
        _ => false,
    }
}

impl DeploymentLocator {
    /// Turn the locator into a concrete descriptor path.
    ///
    /// `Ok(None)` means the KO has nothing for this engine. For a service
    /// graph, candidates are tried in order; a candidate whose context
    /// cannot be loaded or whose expansion yields no usable `@id` is logged
    /// and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::ContextResolution`] listing every
    /// candidate's failure when none of them resolves.
    pub async fn resolve(
        &self,
        fetcher: &HttpFetcher,
        expander: &dyn LinkedDataExpander,
    ) -> ActivatorResult<Option<ResolvedDeployment>> {
        match self {
            Self::None => Ok(None),
            Self::Direct {
                descriptor,
                artifact_root,
            } => Ok(Some(ResolvedDeployment {
                descriptor: descriptor.clone(),
                artifact_root: artifact_root.clone(),
            })),
            Self::ServiceGraph {
                candidates,
                context,
                install_dir,
            } => {
                let mut failures = Vec::with_capacity(candidates.len());
                for candidate in candidates {
                    match resolve_candidate(candidate, context.as_ref(), install_dir, fetcher, expander)
                        .await
                    {
                        Ok(resolved) => return Ok(Some(resolved)),
                        Err(e) => {
                            warn!(install_dir = %install_dir.display(), error = %e, "skipping implementation");
                            failures.push(e.to_string());
                        },
                    }
                }
                if failures.is_empty() {
                    return Ok(None);
                }
                Err(ActivatorError::ContextResolution {
                    context: install_dir.display().to_string(),
                    message: format!("no implementation could be resolved: {}", failures.join("; ")),
                })
            },
        }
    }
}

async fn resolve_candidate(
    candidate: &Value,
    context: Option<&Value>,
    install_dir: &Path,
    fetcher: &HttpFetcher,
    expander: &dyn LinkedDataExpander,
) -> ActivatorResult<ResolvedDeployment> {
    let mut context = match context {
        Some(c) => load_context(c, install_dir, fetcher).await?,
        None => Map::new(),
    };
    let base = directory_url(install_dir)?;
    context.insert("@base".into(), Value::String(base.to_string()));

    let expanded = expander.expand(candidate, &Value::Object(context))?;
    let id = expanded
        .first()
        .and_then(|node| node.get("@id"))
        .and_then(Value::as_str)
        .ok_or_else(|| ActivatorError::ContextResolution {
            context: base.to_string(),
            message: "expanded implementation has no @id".into(),
        })?;

    let dir = iri_to_path(id, install_dir).ok_or_else(|| ActivatorError::ContextResolution {
        context: base.to_string(),
        message: format!("implementation id {id} is not a local directory"),
    })?;
    Ok(ResolvedDeployment {
        descriptor: dir.join(DEPLOYMENT_FILE),
        artifact_root: dir,
    })
}

/// Flatten a context value into a single object, fetching document
/// references and unwrapping their `@context` key.
async fn load_context(
    context: &Value,
    install_dir: &Path,
    fetcher: &HttpFetcher,
) -> ActivatorResult<Map<String, Value>> {
    let mut merged = Map::new();
    for item in as_list(context) {
        match item {
            Value::Object(map) => merged.extend(map.clone()),
            Value::String(reference) => {
                let url = reference_url(reference, install_dir)?;
                let doc = fetcher.get_json(&url).await.map_err(|e| {
                    ActivatorError::ContextResolution {
                        context: reference.clone(),
                        message: e.to_string(),
                    }
                })?;
                let inner = doc.get("@context").cloned().unwrap_or(doc);
                match inner {
                    Value::Object(map) => merged.extend(map),
                    Value::Array(items) => {
                        for part in items {
                            if let Value::Object(map) = part {
                                merged.extend(map);
                            }
                        }
                    },
                    _ => {
                        return Err(ActivatorError::ContextResolution {
                            context: reference.clone(),
                            message: "context document has no object @context".into(),
                        });
                    },
                }
            },
            Value::Null => {},
            other => {
                return Err(ActivatorError::ContextResolution {
                    context: other.to_string(),
                    message: "unsupported @context value".into(),
                });
            },
        }
    }
    Ok(merged)
}

fn reference_url(reference: &str, install_dir: &Path) -> ActivatorResult<Url> {
    if let Ok(url) = Url::parse(reference)
        && url.scheme().len() > 1
    {
        return Ok(url);
    }
    let path = if Path::new(reference).is_absolute() {
        PathBuf::from(reference)
    } else {
        install_dir.join(reference)
    };
    let path = std::path::absolute(&path)?;
    Url::from_file_path(&path).map_err(|()| ActivatorError::ContextResolution {
        context: reference.to_owned(),
        message: format!("cannot express {} as a file URL", path.display()),
    })
}

/// The install directory as a `file:` IRI with a trailing slash.
fn directory_url(dir: &Path) -> ActivatorResult<Url> {
    let dir = std::path::absolute(dir)?;
    Url::from_directory_path(&dir).map_err(|()| ActivatorError::ContextResolution {
        context: dir.display().to_string(),
        message: "install directory cannot be expressed as a file URL".into(),
    })
}

fn iri_to_path(iri: &str, install_dir: &Path) -> Option<PathBuf> {
    match Url::parse(iri) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
        Ok(url) if url.scheme().len() > 1 => None,
        _ => Some(install_dir.join(iri)),
    }
}
