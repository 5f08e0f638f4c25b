use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use xfer_core::client::Client;
use xfer_core::progress::{ProgressEvent, ProgressNotifier};
use xfer_core::transport::TransportConfig;

mod terminal_observer;
use terminal_observer::TerminalProgressObserver;

#[derive(Parser)]
#[command(name = "xfer", about = "Flat-root file-transfer client")]
struct Args {
    /// Server base URL, e.g. http://example.com:8597/
    #[arg(short, long, env = "XFER_SERVER")]
    server: String,

    /// Shared secret sent via the Auth header.
    #[arg(short, long, env = "XFER_AUTH", default_value = "")]
    auth: String,

    /// Worker count for ranged get/put.
    #[arg(short, long, default_value_t = 8)]
    concurrency: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Round-trip the server and print the latency.
    Ping,
    /// List files at the server root.
    Ls,
    /// Download a remote file.
    Get {
        remote: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Upload a local file.
    Put {
        local: PathBuf,
        remote: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Delete a remote file.
    Rm { remote: String },
    /// Rename/move a remote file.
    Mv {
        remote: String,
        target: String,
        #[arg(long)]
        overwrite: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut client = match Client::new(&args.server, TransportConfig::default()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("invalid server url: {e}");
            std::process::exit(1);
        }
    };
    client.set_auth(&args.auth, false);

    let result = match args.command {
        Command::Ping => run_ping(&client).await,
        Command::Ls => run_ls(&client).await,
        Command::Get { remote, output } => run_get(&client, args.concurrency, &remote, &output).await,
        Command::Put {
            local,
            remote,
            overwrite,
        } => run_put(&client, args.concurrency, overwrite, &local, &remote).await,
        Command::Rm { remote } => client.delete(&remote).await,
        Command::Mv {
            remote,
            target,
            overwrite,
        } => client.mv(&remote, &target, overwrite).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run_ping(client: &Client) -> xfer_core::Result<()> {
    let latency = client.ping().await?;
    println!("pong in {:.2}ms", latency.as_secs_f64() * 1000.0);
    Ok(())
}

async fn run_ls(client: &Client) -> xfer_core::Result<()> {
    client.list(|info| {
        println!("{:>12}  {}", info.size, info.name);
    })
    .await
}

async fn run_get(
    client: &Client,
    concurrency: usize,
    remote: &str,
    output: &PathBuf,
) -> xfer_core::Result<()> {
    let (tx, rx) = mpsc::channel::<Result<ProgressEvent, String>>(256);
    let mut notifier = ProgressNotifier::new();
    notifier.add_observer(Box::new(TerminalProgressObserver::new()));
    let notifier_task = tokio::spawn(notifier.run(rx));

    println!("downloading {remote}");
    let start = Instant::now();
    let result = client
        .get(concurrency, remote, output, move |ev| {
            let total = if ev.before { Some(ev.length.max(0) as u64) } else { None };
            let _ = tx.try_send(Ok(ProgressEvent {
                range_id: "download".to_string(),
                bytes_delta: ev.bytes_delta as u64,
                total_bytes: total,
            }));
        })
        .await;

    let _ = notifier_task.await;
    result.map(|()| {
        println!("done in {:.2}s", start.elapsed().as_secs_f64());
    })
}

async fn run_put(
    client: &Client,
    concurrency: usize,
    overwrite: bool,
    local: &PathBuf,
    remote: &str,
) -> xfer_core::Result<()> {
    let (tx, rx) = mpsc::channel::<Result<ProgressEvent, String>>(256);
    let mut notifier = ProgressNotifier::new();
    notifier.add_observer(Box::new(TerminalProgressObserver::new()));
    let notifier_task = tokio::spawn(notifier.run(rx));

    println!("uploading {} as {remote}", local.display());
    let start = Instant::now();
    let result = client
        .put(concurrency, overwrite, local, remote, move |ev| {
            let total = if ev.before { Some(ev.info.total_size) } else { None };
            let _ = tx.try_send(Ok(ProgressEvent {
                range_id: "upload".to_string(),
                bytes_delta: ev.bytes_delta as u64,
                total_bytes: total,
            }));
        })
        .await;

    let _ = notifier_task.await;
    result.map(|()| {
        println!("done in {:.2}s", start.elapsed().as_secs_f64());
    })
}
