//! The activation pipeline driver.

use std::path::PathBuf;
use std::sync::Arc;

use kgrid_config::ActivatorConfig;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::acquire::Acquirer;
use crate::blocking::run_blocking;
use crate::deployment::read_deployment;
use crate::error::ActivatorResult;
use crate::fetch::HttpFetcher;
use crate::linked_data::{IriExpander, LinkedDataExpander};
use crate::loader::{ArtifactLoader, NodeArtifactLoader};
use crate::manifest::{Manifest, ManifestSource, load_manifest, read_snapshot, write_snapshot};
use crate::metadata::MetadataAdapter;
use crate::record::{KoRecord, KoStatus};
use crate::registrar::Registrar;
use crate::registry::{ActivationContext, RegistryBuilder};

/// Runs the activation pipeline once and produces an [`ActivationContext`].
pub struct Activator {
    manifest: Option<String>,
    cache_root: PathBuf,
    fetcher: HttpFetcher,
    acquirer: Acquirer,
    adapter: MetadataAdapter,
    registrar: Registrar,
    expander: Arc<dyn LinkedDataExpander>,
}

impl std::fmt::Debug for Activator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activator")
            .field("manifest", &self.manifest)
            .field("cache_root", &self.cache_root)
            .field("registrar", &self.registrar)
            .finish_non_exhaustive()
    }
}

impl Activator {
    /// Create an activator binding artifacts through `loader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ActivatorConfig, loader: Arc<dyn ArtifactLoader>) -> ActivatorResult<Self> {
        let fetcher = HttpFetcher::new(&config.fetch)?;
        let cache_root = config.activator.cache_root.clone();
        Ok(Self {
            manifest: config.activator.manifest.clone(),
            acquirer: Acquirer::new(cache_root.clone(), fetcher.clone()),
            cache_root,
            fetcher,
            adapter: MetadataAdapter::from_config(&config.activator),
            registrar: Registrar::new(config.activator.engine.clone(), loader),
            expander: Arc::new(IriExpander),
        })
    }

    /// Create an activator that runs JavaScript artifacts in Node.js
    /// sidecars.
    ///
    /// # Errors
    ///
    /// Returns an error if the sidecar script cannot be written to the
    /// cache root or the HTTP client cannot be built.
    pub fn with_node_runtime(config: &ActivatorConfig) -> ActivatorResult<Self> {
        let loader = NodeArtifactLoader::new(&config.activator.cache_root, &config.runtime)?;
        Self::new(config, Arc::new(loader))
    }

    /// Replace the linked-data expander.
    #[must_use]
    pub fn with_expander(mut self, expander: Arc<dyn LinkedDataExpander>) -> Self {
        self.expander = expander;
        self
    }

    /// Override the manifest location.
    #[must_use]
    pub fn with_manifest(mut self, manifest: Option<String>) -> Self {
        self.manifest = manifest;
        self
    }

    /// Run the pipeline.
    ///
    /// With a manifest configured, every KO is acquired and its metadata
    /// read, and the manifest snapshot is written. Without one, a snapshot
    /// from an earlier run is used. Every `loaded` KO then has its routes
    /// bound. Failures are recorded per KO and never abort the run.
    pub async fn activate(&self) -> ActivationContext {
        let manifest = match &self.manifest {
            Some(location) => match self.load_pass(location).await {
                Ok(manifest) => manifest,
                Err(e) => {
                    error!(manifest = %location, error = %e, "cannot load manifest");
                    return ActivationContext::empty();
                },
            },
            None => match self.read_local_snapshot().await {
                Ok(Some(manifest)) => {
                    info!(
                        cache_root = %self.cache_root.display(),
                        count = manifest.len(),
                        "no manifest configured, using local snapshot"
                    );
                    manifest
                },
                Ok(None) => {
                    info!("no manifest configured and no local snapshot, nothing to activate");
                    return ActivationContext::empty();
                },
                Err(e) => {
                    error!(cache_root = %self.cache_root.display(), error = %e, "cannot read local snapshot");
                    return ActivationContext::empty();
                },
            },
        };

        let mut builder = RegistryBuilder::new();
        let mut records = manifest.into_records();
        for record in &mut records {
            if record.status == KoStatus::Loaded {
                self.register_one(record, &mut builder).await;
            }
        }

        let mut activated = 0usize;
        for record in &records {
            if record.status == KoStatus::Activated {
                activated = activated.saturating_add(1);
            }
            info!(
                ko_id = %record.id,
                status = %record.status,
                error = record.error.as_deref().unwrap_or(""),
                "knowledge object"
            );
        }
        info!(
            kos = records.len(),
            activated,
            endpoints = builder.len(),
            "activation complete"
        );

        builder.build(records)
    }

    /// Acquire every KO and read its metadata, then write the snapshot.
    async fn load_pass(&self, location: &str) -> ActivatorResult<Manifest> {
        let source = ManifestSource::parse(location)?;
        let base = source.base_url()?;
        let mut manifest = load_manifest(&source, &self.fetcher).await?;

        for id in manifest.ids() {
            let Some(mut record) = manifest.get(id.as_str()).cloned() else {
                continue;
            };
            if record.status == KoStatus::Error {
                debug!(ko_id = %id, "entry rejected by the manifest, not acquiring");
                continue;
            }
            self.load_one(&mut record, &base).await;
            if let Err(e) = manifest.update(record) {
                warn!(ko_id = %id, error = %e, "manifest update failed");
            }
        }

        let cache_root = self.cache_root.clone();
        let snapshot = manifest.clone();
        if let Err(e) = run_blocking(move || write_snapshot(&cache_root, &snapshot)).await {
            warn!(cache_root = %self.cache_root.display(), error = %e, "cannot write manifest snapshot");
        }
        Ok(manifest)
    }

    async fn read_local_snapshot(&self) -> ActivatorResult<Option<Manifest>> {
        let cache_root = self.cache_root.clone();
        run_blocking(move || read_snapshot(&cache_root)).await
    }

    async fn load_one(&self, record: &mut KoRecord, base: &Url) {
        record.status = KoStatus::Uninitialized;
        record.error = None;

        let acquired = match self.acquirer.acquire(&record.url, Some(base)).await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(ko_id = %record.id, url = %record.url, error = %e, "acquisition failed");
                record.fail(e.to_string());
                return;
            },
        };
        record.url = acquired.resolved_url;
        record.local_url = Some(acquired.local_url);

        let adapter = self.adapter.clone();
        let ko_id = record.id.to_string();
        let install_dir = acquired.install_dir.clone();
        match run_blocking(move || adapter.adapt(&ko_id, &install_dir)).await {
            Ok(adapted) => {
                record.apply_metadata(&adapted.metadata);
                record.set_status(KoStatus::Loaded);
                debug!(ko_id = %record.id, install_dir = %acquired.install_dir.display(), "loaded");
            },
            Err(e) => {
                warn!(ko_id = %record.id, error = %e, "metadata rejected");
                record.fail(e.to_string());
            },
        }
    }

    async fn register_one(&self, record: &mut KoRecord, builder: &mut RegistryBuilder) {
        let Some(install_dir) = self.acquirer.install_dir(record) else {
            record.fail("no local cache directory recorded");
            return;
        };

        let locator = self.adapter.locator_for(record, &install_dir);
        let resolved = match locator.resolve(&self.fetcher, self.expander.as_ref()).await {
            Ok(Some(resolved)) => resolved,
            Ok(None) => {
                debug!(ko_id = %record.id, "no deployment for this engine");
                return;
            },
            Err(e) => {
                warn!(ko_id = %record.id, error = %e, "cannot locate deployment");
                record.push_error(&e.to_string());
                return;
            },
        };

        let descriptor = resolved.descriptor.clone();
        let ko_id = record.id.to_string();
        match run_blocking(move || read_deployment(&descriptor, &ko_id)).await {
            Ok(routes) => {
                self.registrar
                    .register(record, &resolved.artifact_root, routes, builder)
                    .await;
            },
            Err(e) => {
                warn!(ko_id = %record.id, path = %resolved.descriptor.display(), error = %e, "deployment rejected");
                record.fail(e.to_string());
            },
        }
    }
}
