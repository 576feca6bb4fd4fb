use std::io::Write;

/// Prints the interactive prompt marker (`> `) and flushes stdout.
pub fn print_prompt() {
    print!("\n> ");
    let _ = std::io::stdout().flush();
}

/// Prints the startup banner with device info.
pub fn print_banner(device_name: &str, service_id: &str, peers: usize) {
    println!();
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║               📡  nearwave  CLI  📡                 ║");
    println!("╠══════════════════════════════════════════════════════╣");
    println!("║  Device  : {device_name:<41} ║");
    println!("║  Service : {service_id:<41} ║");
    println!("║  Peers   : {:<41} ║", format!("{peers} simulated echo peer(s)"));
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
}

/// Prints available commands.
pub fn print_help() {
    println!();
    println!("  Commands:");
    println!("    list                    Show discovered candidates");
    println!("    connect <endpoint>      Pair with a candidate (you will be");
    println!("                            asked to confirm the auth digits)");
    println!("    send <message>          Send a message over the connection");
    println!("    close                   Close the current connection");
    println!("    help                    Show this help");
    println!("    quit                    Shut down and exit");
    println!();
    println!("  The simulated peers echo every message back.");
}

/// Reads one trimmed line from the given buffered stdin reader.
/// Returns `None` on EOF or read error.
pub async fn read_line(reader: &mut tokio::io::BufReader<tokio::io::Stdin>) -> Option<String> {
    use tokio::io::AsyncBufReadExt;

    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}
