use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shared::{protocol::ClientRequest, view::LocalView};
use skybox_client::{ClientEvent, ParticipantClient, SubmitOutcome};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod console;

use console::{default_download_path, parse_intent, render, Intent};

#[derive(Parser, Debug)]
#[command(about = "Participant client for a shared skybox session")]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8443")]
    server_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current shared state.
    State,
    /// Submit a prompt for a new skybox.
    Submit { prompt: String },
    /// Follow the session and accept prompts and commands from stdin.
    Watch,
    /// Save the current skybox image.
    Download {
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let client = ParticipantClient::new(args.server_url);

    match args.command {
        Command::State => {
            let snapshot = client.state().await?;
            println!("{}", render(&LocalView::default().render(&snapshot.state)));
        }
        Command::Submit { prompt } => {
            if prompt.trim().is_empty() {
                bail!("prompt must not be empty");
            }
            match client.submit(&prompt).await? {
                SubmitOutcome::Accepted(snapshot) => {
                    println!("accepted (submission #{})", snapshot.submission_seq.0)
                }
                SubmitOutcome::Rejected(err) => println!("{}", err.message),
            }
        }
        Command::Watch => watch(&client).await?,
        Command::Download { out } => {
            let snapshot = client.state().await?;
            let Some(url) = snapshot.state.skybox_url else {
                bail!("no skybox has been generated yet");
            };
            download(&client, &url, out).await?;
        }
    }

    Ok(())
}

async fn download(client: &ParticipantClient, url: &str, out: Option<PathBuf>) -> Result<()> {
    let path = out.unwrap_or_else(|| default_download_path(url));
    let written = client
        .download(url, &path)
        .await
        .with_context(|| format!("failed to download {url}"))?;
    info!(path = %path.display(), written, "skybox saved");
    println!("saved {} ({written} bytes)", path.display());
    Ok(())
}

async fn watch(client: &ParticipantClient) -> Result<()> {
    let mut feed = client.connect_feed().await?;
    let mut local = LocalView::default();
    let mut latest = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = feed.events.recv() => match event {
                Ok(ClientEvent::State(snapshot)) => {
                    println!("{}\n", render(&local.render(&snapshot.state)));
                    latest = Some(snapshot.state);
                }
                Ok(ClientEvent::Rejected(err)) => println!("{}", err.message),
                Ok(ClientEvent::Error(message)) => warn!(%message, "change feed error"),
                Ok(ClientEvent::Disconnected) | Err(RecvError::Closed) => {
                    println!("disconnected from session");
                    break;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "change feed lagged"),
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_intent(&line) {
                    Intent::Submit(prompt) => feed
                        .requests
                        .send(ClientRequest::Submit { prompt })
                        .await
                        .context("change feed closed")?,
                    Intent::ToggleGrid => {
                        local.toggle_grid();
                        if let Some(state) = &latest {
                            println!("{}\n", render(&local.render(state)));
                        }
                    }
                    Intent::Download(out) => {
                        match latest.as_ref().and_then(|s| s.skybox_url.clone()) {
                            Some(url) => {
                                if let Err(err) = download(client, &url, out).await {
                                    warn!(error = %format!("{err:#}"), "download failed");
                                }
                            }
                            None => println!("no skybox to download yet"),
                        }
                    }
                    Intent::Quit => break,
                    Intent::Empty => {}
                    Intent::Unknown(name) => {
                        println!("unknown command /{name}; try /grid, /download [path] or /quit")
                    }
                }
            }
        }
    }

    Ok(())
}
