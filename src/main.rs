//! mixed-contents command line entry point

use std::path::PathBuf;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mixed_contents::backend::ContentsBackend;
use mixed_contents::config::Config;
use mixed_contents::dispatch::MixedContents;
use mixed_contents::model::{GetOptions, Model, DEFAULT_CHECKPOINT_ID, NOTEBOOK_EXTENSION};
use mixed_contents::mount::unified_path;
use mixed_contents::ContentsError;

/// Print usage information
fn print_usage() {
    eprintln!("Usage: mixed-contents <config.yaml> <command> [args]");
    eprintln!();
    eprintln!("mixed-contents - file and notebook storage mounted from several backends");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  mounts                          List mount points");
    eprintln!("  resolve <path>                  Show which mount owns a path");
    eprintln!("  ls <path>                       List a directory");
    eprintln!("  get <path>                      Fetch a model with content");
    eprintln!("  exists <path>                   Check whether a path exists");
    eprintln!("  mkdir <path>                    Create a directory");
    eprintln!("  put <path> <local-file>         Upload a local file");
    eprintln!("  rm <path>                       Delete a file or empty directory");
    eprintln!("  mv <from> <to>                  Rename within a mount");
    eprintln!("  checkpoint <path>               Create a checkpoint");
    eprintln!("  checkpoints <path>              List checkpoints");
    eprintln!("  restore <path> [id]             Restore a checkpoint");
    eprintln!("  drop-checkpoint <path> [id]     Delete a checkpoint");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  mixed-contents /etc/mixed-contents/config.yaml ls /");
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Build the model to upload for a local file
fn upload_model(path: &str, data: Vec<u8>) -> Result<Model, ContentsError> {
    if path.ends_with(NOTEBOOK_EXTENSION) {
        let document = serde_json::from_slice(&data)
            .map_err(|e| ContentsError::InvalidModel(format!("Unreadable Notebook: {}", e)))?;
        return Ok(Model::notebook(path, document));
    }
    Ok(match String::from_utf8(data) {
        Ok(text) => Model::text_file(path, text),
        Err(e) => Model::binary_file(path, e.as_bytes()),
    })
}

/// Fetch the positional argument at `index` or exit with usage
fn arg(args: &[String], index: usize) -> &str {
    match args.get(index) {
        Some(value) => value,
        None => {
            print_usage();
            std::process::exit(1);
        }
    }
}

async fn run(
    contents: &MixedContents,
    command: &str,
    args: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        "mounts" => {
            let mounts: Vec<_> = contents
                .mounts()
                .iter()
                .map(|m| json!({"mount": unified_path(m.prefix(), ""), "backend": m.target().kind()}))
                .collect();
            print_json(&mounts)
        }
        "resolve" => {
            let resolved = contents.mounts().resolve(arg(args, 0))?;
            print_json(&json!({
                "mount": unified_path(resolved.prefix, ""),
                "backend": resolved.target.kind(),
                "child_path": resolved.child_path,
            }))
        }
        "ls" => {
            let model = contents
                .get(arg(args, 0), GetOptions::default())
                .await?;
            print_json(&model.children())
        }
        "get" => print_json(&contents.get(arg(args, 0), GetOptions::default()).await?),
        "exists" => print_json(&contents.exists(arg(args, 0)).await?),
        "mkdir" => {
            let path = arg(args, 0);
            print_json(&contents.save(Model::directory(path), path).await?)
        }
        "put" => {
            let path = arg(args, 0);
            let data = tokio::fs::read(arg(args, 1)).await?;
            let model = upload_model(path, data)?;
            print_json(&contents.save(model, path).await?)
        }
        "rm" => {
            contents.delete(arg(args, 0)).await?;
            Ok(())
        }
        "mv" => {
            contents.rename(arg(args, 0), arg(args, 1)).await?;
            Ok(())
        }
        "checkpoint" => print_json(&contents.create_checkpoint(arg(args, 0)).await?),
        "checkpoints" => print_json(&contents.list_checkpoints(arg(args, 0)).await?),
        "restore" => {
            let id = args.get(1).map(String::as_str).unwrap_or(DEFAULT_CHECKPOINT_ID);
            contents.restore_checkpoint(id, arg(args, 0)).await?;
            Ok(())
        }
        "drop-checkpoint" => {
            let id = args.get(1).map(String::as_str).unwrap_or(DEFAULT_CHECKPOINT_ID);
            contents.delete_checkpoint(id, arg(args, 0)).await?;
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        print_usage();
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);

    // Load configuration
    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Loaded configuration from {:?}", config_path);
    if !config.has_root_mount() {
        warn!("No mount owns the root; paths outside the mount points will not resolve");
    }

    let contents = MixedContents::from_config(&config).await?;

    if let Err(e) = run(&contents, &args[2], &args[3..]).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
