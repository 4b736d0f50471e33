use std::io::{self, BufRead, Write};
use std::time::Duration;

use stomp_engine::{AckMode, Client, ConnError, ConnectOptions, Endpoint, Frame, TransportError, parse_heartbeat_header};
use tokio::sync::mpsc;

use super::args::Cli;
use super::commands::{CommandResult, execute_command, print_help};
use super::exit_codes;

/// Run the interactive CLI
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    let endpoint: Endpoint = cli
        .address
        .parse()
        .map_err(|e| (format!("Invalid address '{}': {}", cli.address, e), exit_codes::NETWORK_ERROR))?;

    let (cx, cy) = parse_heartbeat_header(&cli.heartbeat);
    let options = ConnectOptions::default()
        .host(cli.host.as_str())
        .heartbeat(cx, cy)
        .disconnect_timeout(Duration::from_secs(cli.disconnect_timeout));

    let (client, driver) = Client::spawn(options);

    println!("Connecting to {}...", endpoint);
    client
        .on_error(|packet| {
            eprintln!("\n[BROKER ERROR] {}", packet.message().unwrap_or(""));
            eprintln!("  {}", packet.dump());
            print!("> ");
            let _ = io::stdout().flush();
        })
        .await
        .map_err(|e| format_connection_error(&e, &cli.address))?;
    let connected = client
        .login(endpoint, &cli.login, &cli.passcode)
        .await
        .map_err(|e| format_connection_error(&e, &cli.address))?;
    println!(
        "Connected. (session {})",
        connected.get_header("session").unwrap_or("-")
    );

    for dest in &cli.subscribe {
        subscribe_destination(&client, dest).await?;
    }

    // Channel for new subscription requests
    let (sub_tx, mut sub_rx) = mpsc::channel::<String>(16);
    let client_sub = client.clone();
    tokio::spawn(async move {
        while let Some(dest) = sub_rx.recv().await {
            if let Err((msg, _)) = subscribe_destination(&client_sub, &dest).await {
                eprintln!("{}", msg);
            }
        }
    });

    // Channel to receive user commands from stdin reader
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if cmd_tx.blocking_send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!();
    print_help();
    println!();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let line = tokio::select! {
            line = cmd_rx.recv() => match line {
                Some(l) => l,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        match execute_command(&line, &client, &sub_tx).await {
            CommandResult::Ok => {}
            CommandResult::Quit => break,
            CommandResult::Info(msg) => println!("{}", msg),
            CommandResult::Error(msg) => eprintln!("{}", msg),
        }
    }

    println!("Disconnecting...");
    if let Err(e) = client.disconnect().await {
        eprintln!("Disconnect failed: {}", e);
    }
    drop(client);
    driver.abort();
    Ok(())
}

/// Subscribe to a destination and spawn a task printing its messages
async fn subscribe_destination(client: &Client, dest: &str) -> Result<(), (String, u8)> {
    let sub = client
        .subscribe(dest, AckMode::Auto)
        .await
        .map_err(|e| (format!("Failed to subscribe to '{}': {}", dest, e), exit_codes::PROTOCOL_ERROR))?;

    println!("Subscribed to: {} (id {})", dest, sub.id());

    let dest = dest.to_string();
    let mut rx = sub.into_receiver();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            print_message(&dest, &frame);
        }
    });
    Ok(())
}

fn print_message(dest: &str, frame: &Frame) {
    println!("\n[{}] MESSAGE received:", dest);
    for (k, v) in &frame.headers {
        println!("  {}: {}", k, v);
    }
    if !frame.body.is_empty() {
        match std::str::from_utf8(&frame.body) {
            Ok(s) => println!("  Body: {}", s),
            Err(_) => println!("  Body: ({} bytes, binary)", frame.body.len()),
        }
    }
    print!("> ");
    let _ = io::stdout().flush();
}

/// Format a connection error with user-friendly messaging
fn format_connection_error(err: &ConnError, address: &str) -> (String, u8) {
    match err {
        ConnError::Transport(TransportError::Connect(io_err)) | ConnError::Transport(TransportError::Io(io_err)) => {
            let message = match io_err.kind() {
                io::ErrorKind::ConnectionRefused => format!("Connection refused: {}", address),
                io::ErrorKind::TimedOut => format!("Connection timed out: {}", address),
                _ => format!("Connection failed: {}", io_err),
            };
            (message, exit_codes::NETWORK_ERROR)
        }
        ConnError::Transport(TransportError::Timeout) => {
            (format!("Connection timed out: {}", address), exit_codes::NETWORK_ERROR)
        }
        ConnError::Transport(_) | ConnError::NotConnected | ConnError::Closed => {
            (format!("Connection failed: {}", err), exit_codes::NETWORK_ERROR)
        }
        ConnError::Broker { message, frame } => {
            let mut message = format!("Authentication failed: {}", message);
            if !frame.body.is_empty() {
                message.push_str(&format!(" ({})", frame.body_text().trim()));
            }
            (message, exit_codes::AUTH_ERROR)
        }
        other => (format!("Protocol error: {}", other), exit_codes::PROTOCOL_ERROR),
    }
}
