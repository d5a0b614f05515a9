use std::path::PathBuf;

use clap::Parser;

/// Controller that temporarily raises the minReplicas floor of opted-in
/// HorizontalPodAutoscalers, holds it for a configured duration and restores the
/// original values afterwards.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,

    /// Config file overriding the default settings.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
