use std::sync::Arc;

use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};

use nearwave_core::candidate::CandidateEvent;
use nearwave_core::device::{DeviceInfo, Strategy};
use nearwave_core::permissions::AllGranted;
use nearwave_engine::connection::Connection;
use nearwave_engine::engine::Nearby;
use nearwave_engine::memory::MemoryHub;

use crate::event::{PendingAuth, PromptValidator};
use crate::ui::read_line;

/// Spawns a simulated peer on the hub: it advertises, auto-accepts the
/// first offer it gets, then echoes every payload back until the
/// connection closes, forever.
pub fn spawn_echo_peer(hub: &MemoryHub, index: usize, service_id: &str) {
    let id = format!("echo-{index}");
    let name = format!("Echo-{index}");
    let (transport, events) = hub.attach(&id);
    let service_id = service_id.to_string();

    tokio::spawn(async move {
        let nearby = Nearby::new(transport, Arc::new(AllGranted), events);
        let device = DeviceInfo::new(&name, &service_id, Strategy::Star);
        let mut rx = match nearby.start_advertising(&device).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(peer = %id, error = %e, "Echo peer failed to advertise");
                return;
            }
        };

        loop {
            let offer = loop {
                match rx.recv().await {
                    Ok(CandidateEvent::Discovered(c)) if c.is_incoming => break c,
                    Ok(_) => {}
                    Err(_) => return,
                }
            };
            match nearby.connect(&offer, &name).await {
                Ok(mut connection) => {
                    info!(peer = %id, remote = %connection.name(), "Echo peer connected");
                    while let Some(payload) = connection.recv().await {
                        if connection.send_payload(payload).await.is_err() {
                            break;
                        }
                    }
                    info!(peer = %id, "Echo peer connection closed");
                }
                Err(e) => {
                    warn!(peer = %id, error = %e, "Echo peer failed to connect");
                }
            }
        }
    });
}

/// Handles the `connect <endpoint>` command: resolves the candidate and
/// drives the attempt on its own task so the prompt loop stays free to
/// answer the auth digits question.
pub fn handle_connect_cmd(
    parts: &[&str],
    nearby: &Arc<Nearby>,
    local_name: &str,
    pending_tx: &mpsc::UnboundedSender<PendingAuth>,
    established_tx: &mpsc::UnboundedSender<Connection>,
) {
    if parts.len() < 2 {
        println!("  Usage: connect <endpoint>");
        println!("  Use 'list' to see the known endpoints.");
        return;
    }
    let endpoint = parts[1];

    let Some(candidate) = nearby
        .candidates()
        .into_iter()
        .find(|c| c.id == endpoint || c.name == endpoint)
    else {
        println!("  ❌ No known candidate \"{endpoint}\".  Try 'list'.");
        return;
    };

    println!(
        "  🤝 Connecting to \"{}\" ({})...",
        candidate.name, candidate.id
    );

    let nearby = Arc::clone(nearby);
    let local_name = local_name.to_string();
    let validator = Arc::new(PromptValidator::new(
        candidate.id.clone(),
        pending_tx.clone(),
    ));
    let established_tx = established_tx.clone();
    tokio::spawn(async move {
        match nearby.connect_with(&candidate, &local_name, validator).await {
            Ok(connection) => {
                println!(
                    "\n  ✅ Connected to \"{}\" ({})",
                    connection.name(),
                    connection.id()
                );
                let _ = established_tx.send(connection);
            }
            Err(e) => {
                println!("\n  ❌ Connection to {} failed: {e}", candidate.id);
            }
        }
        crate::ui::print_prompt();
    });
}

/// Handles a pending authentication prompt: shows the digits and asks the
/// user to accept or deny.
pub async fn handle_pending_auth(auth: PendingAuth, stdin: &mut BufReader<tokio::io::Stdin>) {
    println!();
    println!(
        "  🔐 Pairing with {}: both devices show the digits [{}]",
        auth.endpoint, auth.digits
    );
    println!("     Type 'accept' or 'deny':");

    loop {
        print!("  [accept/deny] > ");
        let _ = std::io::Write::flush(&mut std::io::stdout());

        let Some(answer) = read_line(stdin).await else {
            let _ = auth.respond.send(false);
            return;
        };

        match answer.to_lowercase().as_str() {
            "accept" | "a" | "yes" | "y" => {
                let _ = auth.respond.send(true);
                return;
            }
            "deny" | "d" | "no" | "n" => {
                println!("  🚫 Denying pairing.");
                let _ = auth.respond.send(false);
                return;
            }
            _ => {
                println!("  Please type 'accept' or 'deny'.");
            }
        }
    }
}

/// Handles the `list` command.
pub fn handle_list_cmd(nearby: &Nearby) {
    let candidates = nearby.candidates();
    if candidates.is_empty() {
        println!("  (no candidates yet — discovery is still scanning)");
        return;
    }
    for candidate in candidates {
        let direction = if candidate.is_incoming {
            "incoming"
        } else {
            "discovered"
        };
        println!("  • {} — \"{}\" [{direction}]", candidate.id, candidate.name);
    }
}
