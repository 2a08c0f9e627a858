use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use delnotes_engine::{
    CacheStatus, EngineConfig, Folder, InMemoryRemote, Note, NoteDraft, QueryClient, QueryKey,
    RemoteServices,
};

#[derive(Parser)]
#[command(name = "delnotes-engine")]
#[command(about = "Optimistic mutation engine walkthrough against an in-memory backend", long_about = None)]
struct Cli {
    /// Simulated remote latency per call
    #[arg(long, default_value = "0")]
    latency_ms: u64,

    /// Probability (0..=1) that a remote call fails
    #[arg(long, default_value = "0")]
    failure_rate: f64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the create / rename / delete walkthrough and print cache state
    Scenario,

    /// Simulate a typing burst against one note
    Autosave {
        /// Number of keystrokes
        #[arg(short, long, default_value = "20")]
        keystrokes: usize,

        /// Pause between keystrokes
        #[arg(long, default_value = "50")]
        interval_ms: u64,

        /// Quiet period before a save fires
        #[arg(long)]
        quiet_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "delnotes_engine=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let remote = Arc::new(InMemoryRemote::new().with_faults(
        Duration::from_millis(cli.latency_ms),
        cli.failure_rate,
    ));
    remote.seed_folder(Folder::new("r1", "Root", None));
    remote.seed_folder(Folder::new("g1", "Journal", None));
    remote.seed_note(Note::new("n1", "g1", "Only note", "{}"));

    let mut config = EngineConfig::from_env().context("loading engine config")?;

    match cli.command {
        Commands::Scenario => {
            config.refetch_on_settle = false;
            let client = QueryClient::new(config, RemoteServices::from_shared(remote))?;
            run_scenario(&client).await?;
        }
        Commands::Autosave {
            keystrokes,
            interval_ms,
            quiet_ms,
        } => {
            if let Some(ms) = quiet_ms {
                config.autosave_quiet_period = Duration::from_millis(ms);
            }
            let client = QueryClient::new(config, RemoteServices::from_shared(remote.clone()))?;
            run_autosave(&client, &remote, keystrokes, Duration::from_millis(interval_ms)).await?;
        }
    }

    Ok(())
}

fn dump(client: &QueryClient, key: &QueryKey) -> Result<()> {
    let entry = client.read(key);
    println!(
        "{} [{}]\n{}",
        key,
        entry.status,
        serde_json::to_string_pretty(&entry.value)?
    );
    Ok(())
}

async fn run_scenario(client: &QueryClient) -> Result<()> {
    let folders = QueryKey::folders();
    let children = QueryKey::children_folders("r1");
    let notes = QueryKey::notes("g1");

    for key in [&folders, &children, &notes] {
        client.fetch(key).await?;
    }

    println!("== create folder \"Inbox\" under r1");
    match client.create_folder(Some("r1"), "Inbox").await {
        Ok(folder) => {
            info!("Remote assigned id {}", folder.id);
            dump(client, &folders)?;
            dump(client, &children)?;

            client.fetch(&children).await?;
            println!("-- after refresh");
            dump(client, &children)?;

            println!("== rename {} to \"Work\"", folder.id);
            match client
                .rename_folder(Some(folder.id.as_str()), Some("r1"), "Work")
                .await
            {
                Ok(_) => println!("rename confirmed"),
                Err(e) => println!("rename rolled back: {}", e),
            }
            dump(client, &children)?;
        }
        Err(e) => println!("create rolled back: {}", e),
    }

    println!("== delete note n1 from g1");
    match client.delete_note("n1", "g1").await {
        Ok(next) => println!("next current note: {:?}", next),
        Err(e) => println!("delete rolled back: {}", e),
    }
    dump(client, &notes)?;

    let stale: Vec<String> = client
        .cache()
        .keys()
        .into_iter()
        .filter(|k| client.cache().status(k) == CacheStatus::Stale)
        .map(|k| k.to_string())
        .collect();
    println!("stale keys: {}", stale.join(", "));
    println!("{}", client.cache().stats());
    Ok(())
}

async fn run_autosave(
    client: &QueryClient,
    remote: &InMemoryRemote,
    keystrokes: usize,
    interval: Duration,
) -> Result<()> {
    client.fetch(&QueryKey::notes("g1")).await?;
    let autosave = client.autosave("n1", "g1");

    let mut content = String::new();
    for i in 0..keystrokes {
        content.push(char::from(b'a' + (i % 26) as u8));
        autosave.notify(NoteDraft::new("Only note", content.clone()))?;
        tokio::time::sleep(interval).await;
    }

    if let Err(e) = autosave.flush().await {
        println!("final save failed: {}", e);
    }

    println!(
        "{} keystrokes, {} remote updates",
        keystrokes,
        remote.calls("update_note")
    );
    if let Some(e) = autosave.last_error() {
        println!("last autosave error: {}", e);
    }
    Ok(())
}
