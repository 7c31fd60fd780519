use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facetrack_core::extractor::DescriptorExtractor;
use facetrack_core::{source, FaceMatch, FramePipeline, Gallery, GalleryBuilder, GalleryHandle, ScrfdDetector};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod attendance;
mod config;
mod engine;

use attendance::{AttendanceSession, JsonLinesSink, Observation, Roster};
use config::Config;

#[derive(Parser)]
#[command(name = "facetrack", about = "Recognise known faces against a gallery of enrolled photos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a gallery from one folder of photos per identity
    Gallery {
        /// Gallery root (default: FACETRACK_GALLERY_DIR or ./known_faces)
        root: Option<PathBuf>,
        /// Write the encodings as JSON records
        #[arg(long)]
        export: Option<PathBuf>,
        /// Turn underscores in folder names into spaces
        #[arg(long)]
        legacy_names: bool,
    },
    /// Print the encoding of the primary face in an image
    Encode { image: PathBuf },
    /// Recognise every face in an image
    Identify {
        image: PathBuf,
        #[command(flatten)]
        gallery: GallerySource,
        #[arg(long, value_parser = parse_threshold)]
        threshold: Option<f32>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record attendance from a directory of captured frames
    Attend {
        /// Session the records belong to (default: a new UUID)
        #[arg(long)]
        session: Option<String>,
        /// Directory of frames, processed in name order
        #[arg(long)]
        frames: PathBuf,
        #[arg(long)]
        gallery_dir: Option<PathBuf>,
        /// TOML roster mapping labels to user ids
        #[arg(long)]
        roster: PathBuf,
        #[arg(long)]
        ledger: Option<PathBuf>,
        #[arg(long, value_parser = parse_threshold)]
        threshold: Option<f32>,
    },
}

#[derive(Args)]
#[group(multiple = false)]
struct GallerySource {
    /// Build the gallery from this directory
    #[arg(long)]
    gallery_dir: Option<PathBuf>,
    /// Load the gallery from exported JSON records
    #[arg(long)]
    gallery_json: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Gallery {
            root,
            export,
            legacy_names,
        } => {
            let root = root.unwrap_or_else(|| config.gallery_dir.clone());
            let mut extractor = DescriptorExtractor::new(load_detector(&config)?);
            let (gallery, report) = GalleryBuilder::new()
                .legacy_names(legacy_names)
                .build(&root, &mut extractor)
                .with_context(|| format!("building gallery from {}", root.display()))?;

            println!(
                "{} encodings for {} identities ({} unreadable, {} without a face, {} empty folders)",
                gallery.len(),
                gallery.identity_count(),
                report.decode_failures,
                report.no_face,
                report.empty_identities,
            );

            if let Some(path) = export {
                let json = serde_json::to_vec(&gallery.to_records())?;
                std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
                println!("exported to {}", path.display());
            }
        }
        Commands::Encode { image } => {
            let frame = open_frame(&image)?;
            let mut pipeline = FramePipeline::new(load_detector(&config)?, GalleryHandle::default(), config.similarity_threshold);
            let encoding = pipeline
                .encode(&frame)
                .with_context(|| format!("encoding {}", image.display()))?;
            println!("{}", serde_json::to_string(&encoding)?);
        }
        Commands::Identify {
            image,
            gallery,
            threshold,
            json,
        } => {
            let frame = open_frame(&image)?;
            let threshold = threshold.unwrap_or(config.similarity_threshold);

            let handle = GalleryHandle::default();
            let mut pipeline = FramePipeline::new(load_detector(&config)?, handle.clone(), threshold);
            match gallery.gallery_json {
                Some(path) => {
                    let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
                    let loaded = Gallery::from_json_slice(&bytes)
                        .with_context(|| format!("loading gallery records from {}", path.display()))?;
                    handle.publish(loaded);
                }
                None => {
                    let root = gallery.gallery_dir.unwrap_or_else(|| config.gallery_dir.clone());
                    pipeline
                        .reload(&root, &GalleryBuilder::new())
                        .with_context(|| format!("building gallery from {}", root.display()))?;
                }
            }

            let matches = pipeline.process(&frame)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&matches)?);
            } else {
                print_matches(&matches);
            }
        }
        Commands::Attend {
            session,
            frames,
            gallery_dir,
            roster,
            ledger,
            threshold,
        } => {
            let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let roster = Roster::load(&roster).context("loading roster")?;
            let ledger = ledger.unwrap_or_else(|| config.ledger_path.clone());
            let sink = JsonLinesSink::open(&ledger)?;
            tracing::info!(session = %session_id, roster = roster.len(), ledger = %ledger.display(), "attendance session started");

            let pipeline = FramePipeline::new(
                load_detector(&config)?,
                GalleryHandle::default(),
                threshold.unwrap_or(config.similarity_threshold),
            );
            let engine = engine::spawn_engine(pipeline)?;

            let root = gallery_dir.unwrap_or_else(|| config.gallery_dir.clone());
            let report = engine
                .reload(root.clone(), GalleryBuilder::new())
                .await
                .with_context(|| format!("building gallery from {}", root.display()))?;
            if report.loaded == 0 {
                tracing::warn!(root = %root.display(), "gallery is empty; every face will be unknown");
            }

            let mut session = AttendanceSession::new(session_id, roster, sink);
            let mut processed = 0usize;
            for path in frame_paths(&frames)? {
                let frame = match source::open_image(&path) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable frame");
                        continue;
                    }
                };
                let matches = match engine.process(frame).await {
                    Ok(matches) => matches,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "dropping frame");
                        continue;
                    }
                };
                processed += 1;

                for m in &matches {
                    match session.observe(&m.result) {
                        Ok(Observation::Recorded(record)) => println!(
                            "{}: marked {} (user {}) conf={:.2}",
                            path.display(),
                            record.student_identifier,
                            record.student_user_id,
                            record.confidence
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "failed to record attendance"),
                    }
                }
            }

            println!(
                "session {}: {} frames processed, {} identities recorded",
                session.session_id(),
                processed,
                session.recorded()
            );
        }
    }

    Ok(())
}

/// Cosine similarity threshold: a finite value in [-1, 1].
fn parse_threshold(value: &str) -> Result<f32, String> {
    let threshold: f32 = value.parse().map_err(|e| format!("{e}"))?;
    if threshold.is_finite() && (-1.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(format!("{value} is not a similarity in [-1, 1]"))
    }
}

fn load_detector(config: &Config) -> Result<ScrfdDetector> {
    let path = config.scrfd_model_path();
    ScrfdDetector::load(&path, config.detection_confidence)
        .with_context(|| format!("loading face detector from {}", path.display()))
}

fn open_frame(path: &Path) -> Result<image::RgbImage> {
    source::open_image(path).with_context(|| format!("opening {}", path.display()))
}

/// Image files directly inside `dir`, sorted by name.
fn frame_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| ["jpg", "jpeg", "png"].iter().any(|k| e.eq_ignore_ascii_case(k)));
        if path.is_file() && is_image {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn print_matches(matches: &[FaceMatch]) {
    if matches.is_empty() {
        println!("no faces detected");
        return;
    }
    for m in matches {
        println!(
            "{:<20} {:>6.3}  at ({}, {}) {}x{}",
            m.result.display_label(),
            m.result.similarity,
            m.region.x,
            m.region.y,
            m.region.width,
            m.region.height
        );
    }
}
