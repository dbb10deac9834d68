use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use kestrel_core::chess::{OBS_SIZE, POLICY_SIZE};
use kestrel_core::network::linear::LinearModel;
use kestrel_core::network::{disk, BoxedModel, ModelHandle};
use kestrel_selfplay::server::SelfplayServer;
use kestrel_selfplay::settings::Settings;

#[derive(Debug, Parser)]
#[command(name = "kestrel", about = "Self-play reinforcement learning engine for chess")]
struct Args {
    /// Path to a JSON options file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model checkpoint path, overriding the configured one.
    #[arg(long)]
    model: Option<PathBuf>,
}

fn boot_model(path: &Path) -> BoxedModel {
    if path.exists() {
        match disk::load_model(path) {
            Ok(model) => {
                info!(
                    path = %path.display(),
                    kind = ?model.kind(),
                    generation = model.generation(),
                    "loaded checkpoint"
                );
                return model;
            }
            Err(e) => warn!("cannot load checkpoint {}: {}, starting fresh", path.display(), e),
        }
    } else {
        info!("no checkpoint at {}, starting fresh", path.display());
    }

    Box::new(LinearModel::new(OBS_SIZE, POLICY_SIZE))
}

fn print_help() {
    println!("commands:");
    println!("  help          show this message");
    println!("  status        engine status, generation and buffer fill");
    println!("  write [path]  write a model checkpoint");
    println!("  read [path]   read a model checkpoint into production");
    println!("  pgn [path]    wait for the next finished game, print or save its PGN");
    println!("  quit          stop all workers and exit");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let args = Args::parse();

    println!("> kestrel {}", env!("CARGO_PKG_VERSION"));

    let mut settings = Settings::load(args.config.as_deref());
    if let Some(model) = &args.model {
        settings.model_path = model.display().to_string();
    }

    let model_path = PathBuf::from(&settings.model_path);
    let model = ModelHandle::new(boot_model(&model_path));

    let mut server = SelfplayServer::new(settings, model);
    server.start();

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        let command = match words.next() {
            Some(command) => command,
            None => continue,
        };
        let argument = words.next();

        match command {
            "help" => print_help(),
            "status" => {
                let state = server.state();
                let partials: Vec<usize> = state
                    .partials
                    .iter()
                    .map(|p| p.load(Ordering::Acquire))
                    .collect();
                println!("status:     {:?}", state.status.code());
                println!("generation: {}", state.model.generation());
                println!("buffer:     {} total / {} capacity", state.buffer.count(), state.buffer.len());
                println!("partials:   {:?}", partials);
                let message = state.status.message();
                if !message.is_empty() {
                    println!("message:    {}", message);
                }
            }
            "write" => {
                let path = argument.map(PathBuf::from).unwrap_or_else(|| model_path.clone());
                match server.state().model.save(&path) {
                    Ok(()) => println!("wrote checkpoint to {}", path.display()),
                    Err(e) => println!("write failed: {}", e),
                }
            }
            "read" => {
                let path = argument.map(PathBuf::from).unwrap_or_else(|| model_path.clone());
                match server.state().model.load(&path) {
                    Ok(()) => println!(
                        "read checkpoint from {}, generation {}",
                        path.display(),
                        server.state().model.generation()
                    ),
                    Err(e) => println!("read failed: {}", e),
                }
            }
            "pgn" => match server.get_next_pgn() {
                Some(pgn) => match argument {
                    Some(path) => {
                        let mut file = std::fs::File::create(path)?;
                        writeln!(file, "{}", pgn)?;
                        println!("wrote PGN to {}", path);
                    }
                    None => println!("{}", pgn),
                },
                None => println!("engine is not running"),
            },
            "quit" => break,
            other => println!("unknown command '{}', try 'help'", other),
        }
    }

    server.stop();
    Ok(())
}
