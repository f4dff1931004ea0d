use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "scriba",
    version,
    about = "Resilient transcription client for the Gemini media API"
)]
pub struct Cli {
    /// Path to a scriba.yaml config file
    #[arg(long)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a media file and print or save the transcript
    Transcribe {
        source: PathBuf,
        /// Declared MIME type; resolved from the filename when omitted
        #[arg(long)]
        mime: Option<String>,
        /// Start on the fast model tier instead of the primary one
        #[arg(long)]
        fast: bool,
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// Run the credential-holding proxy gateway
    Serve {
        #[arg(long, default_value = "127.0.0.1:8787")]
        bind: String,
    },
}
