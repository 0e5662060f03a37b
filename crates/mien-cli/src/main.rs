use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mien_core::Engine;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mien", about = "mien face detection and landmark diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces in an image file and print their boxes as JSON
    Detect {
        /// Image file (any format the image crate decodes)
        image: PathBuf,
        /// SCRFD detector model path (default: $MIEN_DETECTOR_MODEL)
        #[arg(short, long)]
        detector: Option<String>,
    },
    /// Detect faces, then predict landmarks for each face
    Landmarks {
        /// Image file (any format the image crate decodes)
        image: PathBuf,
        /// SCRFD detector model path (default: $MIEN_DETECTOR_MODEL)
        #[arg(short, long)]
        detector: Option<String>,
        /// Landmark model path (default: $MIEN_LANDMARK_MODEL)
        #[arg(short, long)]
        model: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Detect { image, detector } => {
            let detector = resolve_model(detector, "MIEN_DETECTOR_MODEL", "--detector")?;
            let mut engine = Engine::new();
            engine.load_detector(&detector)?;
            ingest(&mut engine, &image)?;

            let faces = engine.detect_faces()?;
            tracing::info!(faces = faces.len(), "detection complete");
            println!("{}", serde_json::to_string_pretty(&faces)?);
        }
        Commands::Landmarks {
            image,
            detector,
            model,
        } => {
            let detector = resolve_model(detector, "MIEN_DETECTOR_MODEL", "--detector")?;
            let model = resolve_model(model, "MIEN_LANDMARK_MODEL", "--model")?;
            let mut engine = Engine::new();
            engine.load_detector(&detector)?;
            engine.load_landmarks(&model)?;
            ingest(&mut engine, &image)?;

            let faces = engine.detect_faces()?;
            tracing::info!(faces = faces.len(), "detection complete");

            let mut report = Vec::with_capacity(faces.len());
            for face in &faces {
                let points = engine.detect_landmarks(face)?;
                report.push(serde_json::json!({
                    "face": face,
                    "landmarks": points,
                }));
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Resolve a model path from the CLI flag or its environment fallback.
fn resolve_model(flag: Option<String>, env_key: &str, flag_name: &str) -> Result<String> {
    flag.or_else(|| std::env::var(env_key).ok())
        .with_context(|| format!("no model path: pass {flag_name} or set {env_key}"))
}

/// Decode an image file and hand its RGB pixels to the engine.
fn ingest(engine: &mut Engine, path: &PathBuf) -> Result<()> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?
        .to_rgb8();
    let (width, height) = decoded.dimensions();
    engine.set_image_rgb(&decoded.into_raw(), width, height, false)?;
    Ok(())
}
