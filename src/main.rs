mod cli;
mod config;
mod constants;
mod error;
mod gateway;
mod generate;
mod media;
mod orchestrator;
mod pipeline;
mod status;
mod telemetry;
mod upload;

use std::sync::Arc;

use anyhow::bail;
use bytes::Bytes;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use config::AppConfig;
use media::MediaDescriptor;
use orchestrator::ModelTier;
use pipeline::Transcriber;
use status::StatusReporter;

/// Console stand-in for the editor UI's status pane.
struct ConsoleReporter;

impl StatusReporter for ConsoleReporter {
    fn report(&self, message: &str, percent: Option<u8>) {
        match percent {
            Some(pct) => eprintln!("[{pct:>3}%] {message}"),
            None => eprintln!("       {message}"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = cli::Cli::parse();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.cmd {
        cli::Command::Transcribe {
            source,
            mime,
            fast,
            output,
        } => {
            let config = AppConfig::load(cli.config.as_deref())?;
            let bytes = tokio::fs::read(&source).await?;
            let file_name = source
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("upload")
                .to_string();
            let descriptor = MediaDescriptor::new(Bytes::from(bytes), file_name, mime);
            let preference = if fast {
                ModelTier::Fast
            } else {
                ModelTier::Primary
            };

            let transcriber = Transcriber::new(config);
            let log = transcriber.attempt_log();
            match transcriber
                .transcribe(descriptor, preference, Arc::new(ConsoleReporter), &cancel)
                .await
            {
                Ok(text) => {
                    match output {
                        Some(path) => {
                            tokio::fs::write(&path, &text).await?;
                            info!(path = %path.display(), "transcript written");
                        }
                        None => println!("{text}"),
                    }
                    Ok(())
                }
                Err(err) => {
                    let summary = log.summarize();
                    for record in log.attempts() {
                        tracing::debug!(
                            model = %record.model,
                            credential = %record.credential_tier,
                            classification = record.classification.as_deref().unwrap_or("ok"),
                            "attempt detail"
                        );
                    }
                    error!(
                        classification = err.classification().as_str(),
                        attempts = summary.total_attempts,
                        "transcription failed: {err}"
                    );
                    bail!("{}", err.user_message())
                }
            }
        }
        cli::Command::Serve { bind } => {
            let config = AppConfig::load(cli.config.as_deref())?;
            let bind = config.gateway_bind.clone().unwrap_or(bind);
            gateway::serve(&config, &bind, cancel).await
        }
    }
}
