use std::path::PathBuf;

use anyhow::{bail, Context};
use baker::{
    lod::{meshopt_chain::MeshoptProcessor, MeshProcessor},
    manifest::CameraHints,
    normalize::UrlNormalizer,
    pipeline::{AssetOptions, Pipeline},
    thumbnail::thumbnail_file_name,
};
use clap::{Args, Parser, Subcommand};
use common::{iiif::GeoPoint, BakerConfig};
use glam::Vec3;

#[derive(Parser)]
#[command(name = "baker")]
#[command(about = "Bake 3D models into LOD tiers and IIIF manifests", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// URL the manifests directory is served from, overrides the config file
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate LOD tiers for a model file or URL
    Lod {
        source: String,
        /// Directory for the tier files
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render a preview image of a model file
    Thumbnail {
        model: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Build a manifest from tiers already in the models directory
    Manifest {
        /// Asset name, the part before `_lod0.glb`
        name: String,
        #[command(flatten)]
        describe: Describe,
    },
    /// Aggregate every manifest into a collection
    Collection {
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Extra collection metadata as KEY=VALUE
        #[arg(short, long = "metadata", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },
    /// Rewrite development server URLs in manifests
    Normalize {
        /// Files to rewrite, the whole manifests directory when omitted
        files: Vec<PathBuf>,
    },
    /// Acquire, simplify, render and describe one or more models, then rebuild the collection
    Run {
        #[arg(required = true)]
        sources: Vec<String>,
        #[command(flatten)]
        describe: Describe,
        /// Leave the collection untouched
        #[arg(long)]
        no_collection: bool,
        /// Rewrite development URLs once everything is written
        #[arg(long)]
        normalize: bool,
    },
}

#[derive(Args)]
struct Describe {
    #[arg(long)]
    label: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Extra manifest metadata as KEY=VALUE, in order
    #[arg(short, long = "metadata", value_parser = parse_key_value)]
    metadata: Vec<(String, String)>,
    /// Latitude for navPlace
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    lat: Option<f64>,
    /// Longitude for navPlace
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    lon: Option<f64>,
    /// Initial camera position
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
    camera: Option<Vec<f32>>,
    /// Point the camera looks at
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
    look_at: Option<Vec<f32>>,
    /// Vertical field of view in degrees
    #[arg(long)]
    fov: Option<f32>,
}

impl Describe {
    fn into_options(self) -> AssetOptions {
        let reserved = [("label", self.label), ("description", self.description)]
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k.to_owned(), v)));

        let vec3 = |v: Vec<f32>| Vec3::from_slice(&v);

        AssetOptions {
            metadata: reserved.chain(self.metadata).collect(),
            geo: self.lat.zip(self.lon).map(|(lat, lon)| GeoPoint { lon, lat }),
            camera: CameraHints {
                position: self.camera.map(vec3),
                look_at: self.look_at.map(vec3),
                field_of_view: self.fov,
                up: None,
            },
        }
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))
}

fn load_config(cli: &Cli) -> anyhow::Result<BakerConfig> {
    let mut config = match &cli.config {
        Some(path) => BakerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BakerConfig::default(),
    };
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    match cli.command {
        Command::Lod { source, output } => {
            if let Some(output) = output {
                config.paths.models = output;
            }
            let pipeline = Pipeline::from_config(config)?;
            let (asset, _, report) = pipeline.generate_lods(&source)?;

            for tier in &report.tiers {
                println!(
                    "{:<6} {:>9} faces {:>8.2} MB  {}",
                    tier.name,
                    tier.face_count,
                    tier.size_mb(),
                    tier.path.display()
                );
            }
            if report.is_empty() {
                bail!("No LOD tiers produced for {}", asset.name());
            }
        }
        Command::Thumbnail { model, output } => {
            let output = output.unwrap_or_else(|| {
                let name = model
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "model".to_owned());
                config.paths.thumbnails.join(thumbnail_file_name(&name))
            });
            let mesh = MeshoptProcessor::new(config.lod.max_memory_mb)
                .load(&model)
                .with_context(|| format!("Failed to load {}", model.display()))?;
            Pipeline::from_config(config)?.render_thumbnail(&mesh, &output)?;
        }
        Command::Manifest { name, describe } => {
            let path = Pipeline::from_config(config)?
                .manifest_from_disk(&name, &describe.into_options())?;
            println!("{}", path.display());
        }
        Command::Collection {
            label,
            description,
            metadata,
        } => {
            if let Some(label) = label {
                config.collection.label = label;
            }
            if description.is_some() {
                config.collection.description = description;
            }
            config.collection.metadata.extend(metadata);
            let path = Pipeline::from_config(config)?.write_collection()?;
            println!("{}", path.display());
        }
        Command::Normalize { files } => {
            let normalizer = UrlNormalizer::new(&config.normalize)?;
            if files.is_empty() {
                normalizer.normalize_dir(&config.paths.manifests)?;
            } else {
                for file in &files {
                    normalizer.normalize_file(file)?;
                }
            }
        }
        Command::Run {
            sources,
            describe,
            no_collection,
            normalize,
        } => {
            let pipeline = Pipeline::from_config(config)?;
            let options = describe.into_options();
            let batch = pipeline.bake_all(sources.iter().map(|s| (s.as_str(), &options)));

            if !batch.baked.is_empty() && !no_collection {
                pipeline.write_collection()?;
            }
            if normalize {
                pipeline.normalize_manifests()?;
            }

            log::info!(
                "{} of {} assets baked",
                batch.baked.len(),
                batch.baked.len() + batch.failed.len()
            );
            if !batch.is_success() {
                let failed: Vec<&str> = batch.failed.iter().map(|(s, _)| s.as_str()).collect();
                bail!("Failed to bake {}", failed.join(", "));
            }
        }
    }

    Ok(())
}
