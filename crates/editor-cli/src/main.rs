//! Command-line tools for stored editor content: normalize it, inspect it, and push media
//! through the upload pipeline.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use sauterhof_editor::{
    DocumentValue, EditorConfig, HttpMediaStore, MediaFile, PluginRegistry,
    UploadPipeline, decode_data_url, extract_media_ids, html, unused_media_ids,
};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sauterhof-editor", about = "Rich content editor tools", version)]
struct Cli {
    /// Path to an editor config file (TOML)
    #[arg(short, long, global = true, env = "SAUTERHOF_EDITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse stored markup and print it in canonical form
    Normalize {
        /// Input file, `-` for stdin
        #[arg(default_value = "-")]
        input: String,
    },
    /// Print the parsed block tree and media order as JSON
    Inspect {
        #[arg(default_value = "-")]
        input: String,
    },
    /// List the stored media ids referenced by the markup
    MediaIds {
        #[arg(default_value = "-")]
        input: String,
    },
    /// List media ids the old content referenced and the new content no longer does
    UnusedMedia {
        #[arg(long)]
        old: PathBuf,
        #[arg(long)]
        new: Option<PathBuf>,
    },
    /// List the editor commands
    Commands {
        #[arg(long)]
        json: bool,
    },
    /// Upload an image or video and print the stored url
    Upload {
        #[arg(long, value_enum)]
        kind: UploadKind,
        /// Base url of the site, e.g. https://sauterhof.de
        #[arg(long)]
        base_url: String,
        /// File path, or a base64 `data:` url for already cropped images
        source: String,
        /// Mime type; guessed from the file extension when omitted
        #[arg(long)]
        mime: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UploadKind {
    Image,
    Video,
}

#[derive(Serialize)]
struct CommandRow<'a> {
    id: &'a str,
    label: &'a str,
    description: Option<&'a str>,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "sauterhof_editor=info",
        1 => "sauterhof_editor=debug",
        _ => "sauterhof_editor=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EditorConfig> {
    let Some(path) = path else {
        return Ok(EditorConfig::default());
    };
    let config = EditorConfig::load_from_path(path)?;
    match config {
        Some(config) => {
            debug!(path = %path.display(), "loaded config");
            Ok(config)
        }
        None => bail!("config file not found: {}", path.display()),
    }
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(input).with_context(|| format!("failed to read {input}"))
}

fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "ogv" => "video/ogg",
        _ => return None,
    };
    Some(mime)
}

fn read_media_file(source: &str, mime: Option<String>) -> Result<MediaFile> {
    if source.starts_with("data:") {
        return decode_data_url(source, sauterhof_editor::CROPPED_IMAGE_NAME)
            .context("invalid data url");
    }
    let path = Path::new(source);
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {source}"))?;
    let mime = match mime.as_deref().or_else(|| guess_mime(path)) {
        Some(mime) => mime.to_string(),
        None => bail!("cannot tell the mime type of {source}; pass --mime"),
    };
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
        .to_string();
    Ok(MediaFile::new(name, mime, bytes))
}

async fn upload(
    config: &EditorConfig,
    kind: UploadKind,
    base_url: &str,
    source: &str,
    mime: Option<String>,
) -> Result<String> {
    let file = read_media_file(source, mime)?;
    let store = HttpMediaStore::new(base_url, &config.upload_endpoint)?;
    info!(endpoint = %store.endpoint(), name = %file.name, size = file.size(), "uploading");
    let pipeline = UploadPipeline::new(store, (), config);
    let result = match kind {
        UploadKind::Image => pipeline.submit_image(file).await,
        UploadKind::Video => pipeline.submit_video(file).await,
    };
    result.map_err(|err| anyhow::anyhow!("{}: {err}", err.user_message()))
}

fn print_commands(json: bool) -> Result<()> {
    let registry = PluginRegistry::richtext();
    let rows: Vec<CommandRow<'_>> = registry
        .command_ids()
        .into_iter()
        .filter_map(|id| registry.commands().get(id))
        .map(|spec| CommandRow {
            id: &spec.id,
            label: &spec.label,
            description: spec.description.as_deref(),
        })
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for row in rows {
        println!("{:<26} {}", row.id, row.label);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Normalize { input } => {
            let markup = read_input(&input)?;
            println!("{}", html::serialize_document(&html::load(&markup)));
        }
        Commands::Inspect { input } => {
            let markup = read_input(&input)?;
            let doc = html::parse_document(&markup).context("failed to parse markup")?;
            println!("{}", DocumentValue::from_document(&doc).to_json_pretty()?);
        }
        Commands::MediaIds { input } => {
            for id in extract_media_ids(&read_input(&input)?) {
                println!("{id}");
            }
        }
        Commands::UnusedMedia { old, new } => {
            let old = std::fs::read_to_string(&old)
                .with_context(|| format!("failed to read {}", old.display()))?;
            let new = match new {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                ),
                None => None,
            };
            for id in unused_media_ids(&old, new.as_deref()) {
                println!("{id}");
            }
        }
        Commands::Commands { json } => print_commands(json)?,
        Commands::Upload {
            kind,
            base_url,
            source,
            mime,
        } => {
            let url = upload(&config, kind, &base_url, &source, mime).await?;
            println!("{url}");
        }
    }
    Ok(())
}
