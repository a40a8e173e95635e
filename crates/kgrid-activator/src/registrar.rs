//! Binds a KO's routes to callables and records the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::deployment::{DeclaredRoutes, RouteSpec};
use crate::error::{ActivatorError, ActivatorResult};
use crate::loader::ArtifactLoader;
use crate::record::{KoRecord, KoStatus};
use crate::registry::RegistryBuilder;

/// Binds routes that target this activator's engine.
#[derive(Clone)]
pub struct Registrar {
    engine: String,
    loader: Arc<dyn ArtifactLoader>,
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Registrar {
    /// Create a registrar for engine id `engine`.
    #[must_use]
    pub fn new(engine: impl Into<String>, loader: Arc<dyn ArtifactLoader>) -> Self {
        Self {
            engine: engine.into(),
            loader,
        }
    }

    /// This activator's engine id.
    #[must_use]
    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// Bind every route of `record` whose engine matches.
    ///
    /// Routes for other engines are skipped. An invalid route, a binding
    /// failure, or an endpoint id already bound by another KO is appended to
    /// the record's error and the remaining routes are still bound. Returns
    /// `true`, and marks the record `activated`, only when every matching
    /// route bound.
    pub async fn register(
        &self,
        record: &mut KoRecord,
        artifact_root: &Path,
        routes: DeclaredRoutes,
        registry: &mut RegistryBuilder,
    ) -> bool {
        let mut all_bound = true;

        for route in routes {
            let spec = match route {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(ko_id = %record.id, error = %e, "invalid route");
                    all_bound = false;
                    record.push_error(&e.to_string());
                    continue;
                },
            };
            if let Err(e) = self.check_engine(&spec) {
                debug!(ko_id = %record.id, endpoint = %spec.id, reason = %e, "skipping route");
                continue;
            }
            if let Err(e) = self.bind(record, artifact_root, spec, registry).await {
                warn!(ko_id = %record.id, error = %e, "endpoint binding failed");
                all_bound = false;
                record.push_error(&e.to_string());
            }
        }

        if all_bound {
            record.set_status(KoStatus::Activated);
        }
        all_bound
    }

    async fn bind(
        &self,
        record: &KoRecord,
        artifact_root: &Path,
        spec: RouteSpec,
        registry: &mut RegistryBuilder,
    ) -> ActivatorResult<()> {
        if let Some(owner) = registry.owner(&spec.id)
            && owner != spec.ko
        {
            return Err(ActivatorError::EndpointConflict {
                endpoint: spec.id,
                owner: owner.to_owned(),
            });
        }

        let artifact = artifact_path(artifact_root, &spec.engine.artifact)?;
        let callable = self
            .loader
            .load_function(&artifact, &spec.engine.function)
            .await?;

        let id = spec.id.clone();
        if registry.insert(spec, callable)? {
            warn!(ko_id = %record.id, endpoint = %id, "endpoint declared twice, keeping the later one");
        } else {
            debug!(ko_id = %record.id, endpoint = %id, "endpoint bound");
        }
        Ok(())
    }

    fn check_engine(&self, spec: &RouteSpec) -> ActivatorResult<()> {
        if spec.engine.name == self.engine {
            Ok(())
        } else {
            Err(ActivatorError::EngineMismatch {
                expected: self.engine.clone(),
                found: spec.engine.name.clone(),
            })
        }
    }
}

/// Absolute path of `artifact`, relative paths taken from `artifact_root`.
fn artifact_path(artifact_root: &Path, artifact: &str) -> ActivatorResult<PathBuf> {
    let path = Path::new(artifact);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        artifact_root.join(path)
    };
    Ok(std::path::absolute(joined)?)
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::deployment::EngineSpec;
    use crate::loader::StaticArtifactLoader;
    use crate::record::KoId;

    const ENGINE: &str = "org.kgrid.javascript-activator";

    fn spec_for(ko: &str, path: &str, engine: &str, function: &str) -> RouteSpec {
        RouteSpec {
            id: format!("{ko}{path}"),
            ko: ko.into(),
            method: "post".into(),
            engine: EngineSpec {
                name: engine.into(),
                artifact: "src/index.js".into(),
                function: function.into(),
            },
        }
    }

    fn spec(path: &str, engine: &str, function: &str) -> ActivatorResult<RouteSpec> {
        Ok(spec_for("ko1", path, engine, function))
    }

    fn loaded_record(id: &str) -> KoRecord {
        let mut r = KoRecord::new(KoId::new(id).unwrap(), format!("{id}.zip"));
        r.set_status(KoStatus::Loaded);
        r
    }

    fn registrar(functions: &[&str]) -> Registrar {
        let loader = functions.iter().fold(StaticArtifactLoader::new(), |l, f| {
            l.with_function("index.js", f, |input: &Value| Ok(input.clone()))
        });
        Registrar::new(ENGINE, Arc::new(loader))
    }

    #[tokio::test]
    async fn all_bound_activates() {
        let mut record = loaded_record("ko1");
        let mut builder = RegistryBuilder::new();
        let ok = registrar(&["a", "b"])
            .register(
                &mut record,
                Path::new("/cache/ko1"),
                vec![spec("/a", ENGINE, "a"), spec("/b", ENGINE, "b")],
                &mut builder,
            )
            .await;
        assert!(ok);
        assert_eq!(record.status, KoStatus::Activated);
        assert_eq!(builder.len(), 2);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn one_failure_keeps_loaded() {
        let mut record = loaded_record("ko1");
        let mut builder = RegistryBuilder::new();
        let ok = registrar(&["a", "c"])
            .register(
                &mut record,
                Path::new("/cache/ko1"),
                vec![
                    spec("/a", ENGINE, "a"),
                    spec("/b", ENGINE, "b"),
                    spec("/c", ENGINE, "c"),
                ],
                &mut builder,
            )
            .await;
        assert!(!ok);
        assert_eq!(record.status, KoStatus::Loaded);
        assert!(builder.contains("ko1/a"));
        assert!(!builder.contains("ko1/b"));
        assert!(builder.contains("ko1/c"));
        assert!(record.error.as_deref().unwrap().contains("cannot bind b"));
    }

    #[tokio::test]
    async fn invalid_route_is_recorded_and_others_bind() {
        let mut record = loaded_record("ko1");
        let mut builder = RegistryBuilder::new();
        let broken = Err(ActivatorError::InvalidDeployment {
            ko_id: "ko1".into(),
            message: "/broken has no post.engine".into(),
        });
        let ok = registrar(&["a", "c"])
            .register(
                &mut record,
                Path::new("/cache/ko1"),
                vec![spec("/a", ENGINE, "a"), broken, spec("/c", ENGINE, "c")],
                &mut builder,
            )
            .await;
        assert!(!ok);
        assert_eq!(record.status, KoStatus::Loaded);
        assert!(builder.contains("ko1/a"));
        assert!(builder.contains("ko1/c"));
        assert!(record.error.as_deref().unwrap().contains("/broken"));
    }

    #[tokio::test]
    async fn foreign_engine_is_skipped_not_fatal() {
        let mut record = loaded_record("ko1");
        let mut builder = RegistryBuilder::new();
        let ok = registrar(&["b"])
            .register(
                &mut record,
                Path::new("/cache/ko1"),
                vec![
                    spec("/a", "org.kgrid.python-activator", "a"),
                    spec("/b", ENGINE, "b"),
                ],
                &mut builder,
            )
            .await;
        assert!(ok);
        assert_eq!(record.status, KoStatus::Activated);
        assert!(!builder.contains("ko1/a"));
        assert!(builder.contains("ko1/b"));
    }

    #[tokio::test]
    async fn endpoint_owned_by_another_ko_is_not_rebound() {
        let registrar = registrar(&["run"]);
        let mut builder = RegistryBuilder::new();

        let mut first = loaded_record("ko1");
        assert!(
            registrar
                .register(
                    &mut first,
                    Path::new("/cache/ko1"),
                    vec![Ok(spec_for("ko1", "/run", ENGINE, "run"))],
                    &mut builder,
                )
                .await
        );

        let mut second = loaded_record("ko");
        let ok = registrar
            .register(
                &mut second,
                Path::new("/cache/ko"),
                vec![Ok(spec_for("ko", "1/run", ENGINE, "run"))],
                &mut builder,
            )
            .await;

        assert!(!ok);
        assert_eq!(first.status, KoStatus::Activated);
        assert_eq!(second.status, KoStatus::Loaded);
        assert!(
            second
                .error
                .as_deref()
                .unwrap()
                .contains("already bound by ko1")
        );
        assert_eq!(builder.owner("ko1/run"), Some("ko1"));
    }

    #[test]
    fn artifact_paths() {
        assert_eq!(
            artifact_path(Path::new("/cache/ko1"), "src/index.js").unwrap(),
            PathBuf::from("/cache/ko1/src/index.js")
        );
        assert_eq!(
            artifact_path(Path::new("/cache/ko1"), "/opt/lib.js").unwrap(),
            PathBuf::from("/opt/lib.js")
        );
        assert!(artifact_path(Path::new("rel"), "a.js").unwrap().is_absolute());
    }

    #[tokio::test]
    async fn invoking_bound_endpoint() {
        let mut record = loaded_record("ko1");
        let mut builder = RegistryBuilder::new();
        registrar(&["a"])
            .register(
                &mut record,
                Path::new("/cache/ko1"),
                vec![spec("/a", ENGINE, "a")],
                &mut builder,
            )
            .await;
        let ctx = builder.build(vec![record]);
        assert_eq!(ctx.invoke("ko1/a", json!(5)).await.unwrap().result, json!(5));
    }
}
