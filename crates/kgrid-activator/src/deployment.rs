//! Deployment descriptor → route specifications.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value as Yaml;

use crate::error::{ActivatorError, ActivatorResult};

/// HTTP method every KO endpoint is exposed under.
pub const ENDPOINT_METHOD: &str = "post";

/// The engine an endpoint runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSpec {
    /// Engine id, e.g. `org.kgrid.javascript-activator`.
    pub name: String,
    /// Artifact path, relative to the artifact root unless absolute.
    pub artifact: String,
    /// Exported function name.
    pub function: String,
}

/// One endpoint declared by a KO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// Endpoint id: KO id followed by the sub-path.
    #[serde(rename = "@id")]
    pub id: String,
    /// Owning KO id.
    pub ko: String,
    /// Always `post`.
    pub method: String,
    /// Engine binding.
    pub engine: EngineSpec,
}

/// Routes declared by a deployment document, in document order. A path
/// that does not describe a valid route is kept as an error in its place.
pub type DeclaredRoutes = Vec<ActivatorResult<RouteSpec>>;

/// Flatten a deployment document into routes, in document order.
///
/// A path lacking `post.engine` with string `name`, `artifact` and
/// `function` yields an [`ActivatorError::InvalidDeployment`] entry; the
/// other paths are unaffected.
///
/// # Errors
///
/// Returns [`ActivatorError::InvalidDeployment`] if the document is not
/// YAML or not a mapping.
pub fn transform(document: &str, ko_id: &str) -> ActivatorResult<DeclaredRoutes> {
    let invalid = |message: String| ActivatorError::InvalidDeployment {
        ko_id: ko_id.to_owned(),
        message,
    };

    let parsed: Yaml =
        serde_yaml::from_str(document).map_err(|e| invalid(format!("not valid YAML: {e}")))?;
    let Yaml::Mapping(paths) = parsed else {
        return Err(invalid("deployment must be a mapping of paths".into()));
    };

    Ok(paths
        .iter()
        .map(|(key, value)| route(key, value, ko_id).map_err(invalid))
        .collect())
}

fn route(key: &Yaml, value: &Yaml, ko_id: &str) -> Result<RouteSpec, String> {
    let sub_path = key
        .as_str()
        .ok_or_else(|| format!("path key {key:?} is not a string"))?;
    let engine = value
        .get(ENDPOINT_METHOD)
        .and_then(|post| post.get("engine"))
        .ok_or_else(|| format!("{sub_path} has no post.engine"))?;

    let field = |name: &str| {
        engine
            .get(name)
            .and_then(Yaml::as_str)
            .map(str::to_owned)
            .ok_or_else(|| format!("{sub_path} engine has no string '{name}'"))
    };

    Ok(RouteSpec {
        id: format!("{ko_id}{sub_path}"),
        ko: ko_id.to_owned(),
        method: ENDPOINT_METHOD.to_owned(),
        engine: EngineSpec {
            name: field("name")?,
            artifact: field("artifact")?,
            function: field("function")?,
        },
    })
}

/// Read and transform the descriptor at `path`.
///
/// # Errors
///
/// Returns [`ActivatorError::MissingSpecificationFile`] if the file cannot
/// be read, otherwise as [`transform`].
pub fn read_deployment(path: &Path, ko_id: &str) -> ActivatorResult<DeclaredRoutes> {
    let text =
        std::fs::read_to_string(path).map_err(|e| ActivatorError::MissingSpecificationFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    transform(&text, ko_id)
}
