use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use common::{iiif::GeoPoint, Asset, BakerConfig, LodTier, TriMesh};

use crate::{
    acquire::{AssetAcquirer, Fetch, UreqFetcher},
    collection::CollectionBuilder,
    lod::{meshopt_chain::MeshoptProcessor, LodGenerator, LodReport, MeshProcessor},
    manifest::{
        discover_tiers, manifest_file_name, thumbnail_tier, write_manifest, CameraHints,
        ManifestBuilder, ManifestRequest, ThumbnailImage,
    },
    normalize::UrlNormalizer,
    thumbnail::{placeholder, thumbnail_file_name, Render, SoftwareRenderer},
};

/// Per-asset inputs that are not geometry.
#[derive(Debug, Clone, Default)]
pub struct AssetOptions {
    pub metadata: Vec<(String, String)>,
    pub geo: Option<GeoPoint>,
    pub camera: CameraHints,
}

#[derive(Debug)]
pub struct BakeOutcome {
    pub name: String,
    pub asset: Asset,
    pub report: LodReport,
    pub thumbnail: Option<PathBuf>,
    pub manifest: PathBuf,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub baked: Vec<BakeOutcome>,
    pub failed: Vec<(String, anyhow::Error)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Acquire, simplify, render, describe. One asset at a time.
pub struct Pipeline<F, P, R> {
    config: BakerConfig,
    acquirer: AssetAcquirer<F>,
    generator: LodGenerator<P>,
    renderer: R,
    generated: Option<String>,
}

impl Pipeline<UreqFetcher, MeshoptProcessor, SoftwareRenderer> {
    pub fn from_config(config: BakerConfig) -> anyhow::Result<Self> {
        let tiers = config.lod.tier_specs().context("Invalid LOD configuration")?;
        let acquirer = AssetAcquirer::new(&config.paths.cache);
        let generator = LodGenerator::new(MeshoptProcessor::new(config.lod.max_memory_mb), tiers)
            .with_min_faces(config.lod.min_faces);
        let renderer = SoftwareRenderer {
            background: config.thumbnail.background,
            ..Default::default()
        };
        Ok(Self::new(config, acquirer, generator, renderer))
    }
}

impl<F, P, R> Pipeline<F, P, R>
where
    F: Fetch,
    P: MeshProcessor<Mesh = TriMesh>,
    R: Render,
{
    pub fn new(
        config: BakerConfig,
        acquirer: AssetAcquirer<F>,
        generator: LodGenerator<P>,
        renderer: R,
    ) -> Self {
        Self {
            config,
            acquirer,
            generator,
            renderer,
            generated: None,
        }
    }

    /// Pin the `Generated` timestamp written into every document.
    pub fn with_timestamp(mut self, generated: impl Into<String>) -> Self {
        self.generated = Some(generated.into());
        self
    }

    pub fn config(&self) -> &BakerConfig {
        &self.config
    }

    pub fn generator(&self) -> &LodGenerator<P> {
        &self.generator
    }

    fn manifest_builder(&self) -> ManifestBuilder<'_> {
        let builder = ManifestBuilder::new(&self.config);
        match &self.generated {
            Some(ts) => builder.with_timestamp(ts.clone()),
            None => builder,
        }
    }

    fn collection_builder(&self) -> CollectionBuilder<'_> {
        let builder = CollectionBuilder::new(&self.config);
        match &self.generated {
            Some(ts) => builder.with_timestamp(ts.clone()),
            None => builder,
        }
    }

    /// Resolve `source` and write every LOD tier into the models directory.
    pub fn generate_lods(&self, source: &str) -> anyhow::Result<(Asset, TriMesh, LodReport)> {
        let asset = self
            .acquirer
            .acquire(source)
            .with_context(|| format!("Failed to acquire {source}"))?;
        let mesh = self
            .generator
            .load(asset.path())
            .with_context(|| format!("Failed to load {}", asset.path().display()))?;

        let report = self
            .generator
            .generate(&mesh, &asset.name(), &self.config.paths.models)
            .with_context(|| {
                format!(
                    "Failed to prepare output directory {}",
                    self.config.paths.models.display()
                )
            })?;

        for skipped in &report.skipped {
            log::warn!(
                "{} tier {} was not produced, re-run with ratio {}",
                asset.name(),
                skipped.name,
                skipped.ratio
            );
        }

        Ok((asset, mesh, report))
    }

    /// Draw `mesh` into `path`, falling back to a placeholder image when it cannot be drawn.
    pub fn render_thumbnail(&self, mesh: &TriMesh, path: &Path) -> anyhow::Result<(u32, u32)> {
        let resolution = (self.config.thumbnail.width, self.config.thumbnail.height);
        let png = match self.renderer.render(mesh, resolution) {
            Ok(png) => png,
            Err(e) => {
                log::warn!("Rendering {} failed ({e}), using a placeholder", path.display());
                placeholder(resolution, self.config.thumbnail.background)
                    .context("Failed to draw placeholder thumbnail")?
            }
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, png).with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("Thumbnail saved to {}", path.display());
        Ok(resolution)
    }

    /// Render the manifest thumbnail tier. Problems are logged and yield no image.
    fn tier_thumbnail(
        &self,
        name: &str,
        tiers: &[LodTier],
        source: Option<&TriMesh>,
    ) -> Option<ThumbnailImage> {
        if !self.config.thumbnail.enabled {
            return None;
        }

        let sorted: Vec<&LodTier> = tiers.iter().collect();
        let tier = thumbnail_tier(&sorted)?;
        let loaded = match self.generator.load(&tier.path) {
            Ok(mesh) => Some(mesh),
            Err(e) => {
                log::warn!("Could not reload {} for its thumbnail: {e}", tier.path.display());
                None
            }
        };
        let mesh = loaded.as_ref().or(source)?;

        let file = thumbnail_file_name(name);
        let path = self.config.paths.thumbnails.join(&file);
        match self.render_thumbnail(mesh, &path) {
            Ok((width, height)) => Some(ThumbnailImage {
                url: self.config.thumbnail_url(&file),
                width,
                height,
            }),
            Err(e) => {
                log::warn!("No thumbnail for {name}: {e:#}");
                None
            }
        }
    }

    pub fn write_manifest(
        &self,
        name: &str,
        tiers: &[LodTier],
        options: &AssetOptions,
        thumbnail_image: Option<ThumbnailImage>,
    ) -> anyhow::Result<PathBuf> {
        let manifest = self.manifest_builder().build(&ManifestRequest {
            name,
            tiers,
            metadata: &options.metadata,
            geo: options.geo,
            camera: options.camera,
            thumbnail_image,
        })?;

        let path = self.config.paths.manifests.join(manifest_file_name(name));
        write_manifest(&manifest, &path)?;
        log::info!("Manifest saved to {}", path.display());
        Ok(path)
    }

    /// Build a manifest for tiers already on disk, rendering a fresh thumbnail.
    pub fn manifest_from_disk(&self, name: &str, options: &AssetOptions) -> anyhow::Result<PathBuf> {
        let specs = self.config.lod.tier_specs()?;
        let tiers = discover_tiers(
            self.generator.processor(),
            &self.config.paths.models,
            name,
            &specs,
        )?;
        log::info!("Found {} LOD tiers for {name}", tiers.len());

        let thumbnail = self.tier_thumbnail(name, &tiers, None);
        self.write_manifest(name, &tiers, options, thumbnail)
    }

    pub fn bake(&self, source: &str, options: &AssetOptions) -> anyhow::Result<BakeOutcome> {
        let (asset, mesh, report) = self.generate_lods(source)?;
        let name = asset.name();

        let thumbnail_image = self.tier_thumbnail(&name, &report.tiers, Some(&mesh));
        let thumbnail = thumbnail_image
            .as_ref()
            .map(|_| self.config.paths.thumbnails.join(thumbnail_file_name(&name)));

        let manifest = self.write_manifest(&name, &report.tiers, options, thumbnail_image)?;

        Ok(BakeOutcome {
            name,
            asset,
            report,
            thumbnail,
            manifest,
        })
    }

    /// Bake every source. One asset failing never stops the others.
    pub fn bake_all<'s>(
        &self,
        jobs: impl IntoIterator<Item = (&'s str, &'s AssetOptions)>,
    ) -> BatchReport {
        let mut batch = BatchReport::default();
        for (source, options) in jobs {
            match self.bake(source, options) {
                Ok(outcome) => {
                    log::info!(
                        "Baked {}: {} tiers, {} skipped",
                        outcome.name,
                        outcome.report.tiers.len(),
                        outcome.report.skipped.len()
                    );
                    batch.baked.push(outcome);
                }
                Err(e) => {
                    log::error!("Failed to bake {source}: {e:#}");
                    batch.failed.push((source.to_owned(), e));
                }
            }
        }
        batch
    }

    pub fn write_collection(&self) -> anyhow::Result<PathBuf> {
        let path = self
            .collection_builder()
            .build_and_write(&self.config.paths.manifests)?;
        log::info!("Collection saved to {}", path.display());
        Ok(path)
    }

    pub fn normalize_manifests(&self) -> anyhow::Result<usize> {
        let normalizer = UrlNormalizer::new(&self.config.normalize)?;
        Ok(normalizer.normalize_dir(&self.config.paths.manifests)?)
    }
}
