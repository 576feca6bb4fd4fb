mod command;
mod event;
mod ui;

use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt};

use nearwave_core::device::{DeviceInfo, Strategy};
use nearwave_core::permissions::AllGranted;
use nearwave_engine::connection::{Connection, ConnectionHandle};
use nearwave_engine::engine::Nearby;
use nearwave_engine::memory::MemoryHub;

use crate::command::{handle_connect_cmd, handle_list_cmd, handle_pending_auth, spawn_echo_peer};
use crate::event::{PendingAuth, spawn_event_printer};
use crate::ui::{print_banner, print_help, print_prompt, read_line};

/// nearwave — peer-to-peer nearby connections.
///
/// Starts a local engine plus a handful of simulated peers on an
/// in-process hub.  An interactive prompt lets you discover the peers,
/// pair with digit confirmation, and exchange echo messages.
#[derive(Parser, Debug)]
#[command(name = "nearwave", version, about)]
struct Args {
    /// Human-readable name for this device.
    #[arg(short, long, default_value = "Nearwave-CLI")]
    name: String,

    /// Service id shared by all devices on the hub.
    #[arg(short, long, default_value = "demo.nearwave")]
    service: String,

    /// Number of simulated echo peers to spawn.
    #[arg(short, long, default_value_t = 2)]
    peers: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Tracing goes to stderr so it doesn't mix with the interactive
    // prompt on stdout.  Default to "warn" for library crates so
    // only the CLI's own output is visible.
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("nearwave_cli=info,warn")),
        )
        .init();

    let hub = MemoryHub::new();
    for index in 1..=args.peers {
        spawn_echo_peer(&hub, index, &args.service);
    }

    let (transport, events) = hub.attach("local");
    let nearby = Arc::new(Nearby::new(transport, Arc::new(AllGranted), events));

    let device = DeviceInfo::new(&args.name, &args.service, Strategy::Star);
    let candidate_events = match nearby.start_discovery(&device).await {
        Ok(rx) => rx,
        Err(e) => {
            eprintln!("Failed to start discovery: {e}");
            std::process::exit(1);
        }
    };

    // Channel for auth prompts that need user input, and one for
    // connections established by background connect tasks.
    let (pending_tx, mut pending_rx) = mpsc::unbounded_channel::<PendingAuth>();
    let (established_tx, mut established_rx) = mpsc::unbounded_channel::<Connection>();

    spawn_event_printer(candidate_events);

    // Small delay so the first discoveries print before the banner.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    // ── Banner ──────────────────────────────────────────────────
    print_banner(&args.name, &args.service, args.peers);
    print_help();
    print_prompt();

    // ── Interactive prompt loop ─────────────────────────────────
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut active: Option<ConnectionHandle> = None;

    loop {
        tokio::select! {
            biased;

            // Check for auth prompts that need a response.
            Some(auth) = pending_rx.recv() => {
                handle_pending_auth(auth, &mut stdin).await;
                print_prompt();
            }

            // Adopt connections established by connect tasks.  The
            // inbound half goes to its own printer task so the prompt
            // loop only keeps the send/close handle.
            Some(connection) = established_rx.recv() => {
                let (handle, inbound) = connection.split();
                let remote = handle.name().to_string();
                if let Some(old) = active.replace(handle) {
                    println!("  ℹ Replacing connection to {}", old.id());
                    old.close().await;
                }
                spawn_payload_printer(remote, inbound);
            }

            // Read user input.
            line = read_line(&mut stdin) => {
                let Some(line) = line else {
                    // EOF — shut down.
                    break;
                };

                if line.is_empty() {
                    print_prompt();
                    continue;
                }

                let parts: Vec<&str> = line.splitn(2, ' ').collect();

                match parts[0] {
                    "list" | "ls" => {
                        handle_list_cmd(&nearby);
                    }
                    "connect" => {
                        handle_connect_cmd(&parts, &nearby, &args.name, &pending_tx, &established_tx);
                    }
                    "send" => {
                        handle_send_cmd(&parts, &active).await;
                    }
                    "close" => {
                        match active.take() {
                            Some(handle) => {
                                println!("  ⏹ Closing connection to {}", handle.id());
                                handle.close().await;
                            }
                            None => println!("  ℹ No active connection."),
                        }
                    }
                    "help" | "?" => {
                        print_help();
                    }
                    "quit" | "exit" | "q" => {
                        break;
                    }
                    other => {
                        println!("  ❓ Unknown command: \"{other}\".  Type 'help' for usage.");
                    }
                }

                print_prompt();
            }
        }
    }

    println!("\n  Shutting down...");
    if let Some(handle) = active.take() {
        handle.close().await;
    }
    nearby.stop_discovery().await;
    println!("  Bye! 👋");
}

/// Spawns a task that prints everything arriving on a connection's
/// inbound stream, until the remote side closes it.
fn spawn_payload_printer(remote_name: String, mut inbound: mpsc::Receiver<Bytes>) {
    tokio::spawn(async move {
        while let Some(payload) = inbound.recv().await {
            println!(
                "\n  💬 [{remote_name}] {}",
                String::from_utf8_lossy(&payload)
            );
            print_prompt();
        }
        println!("\n  📴 Connection to \"{remote_name}\" closed");
        print_prompt();
    });
}

async fn handle_send_cmd(parts: &[&str], active: &Option<ConnectionHandle>) {
    let Some(handle) = active.as_ref() else {
        println!("  ℹ Not connected.  Use 'connect <endpoint>' first.");
        return;
    };
    if parts.len() < 2 || parts[1].is_empty() {
        println!("  Usage: send <message>");
        return;
    }
    let payload = Bytes::from(parts[1].to_string());
    match handle.send_payload(payload).await {
        Ok(()) => println!("  📤 Sent."),
        Err(e) => println!("  ❌ Send failed: {e}"),
    }
}
