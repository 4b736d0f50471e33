use stomp_engine::{Client, Command};
use tokio::sync::mpsc;

/// Result of executing a command
pub enum CommandResult {
    /// Command executed successfully
    Ok,
    /// Command requests exit
    Quit,
    /// Informational output for the user
    Info(String),
    /// Error executing command
    Error(String),
}

/// Parse and execute a command
pub async fn execute_command(line: &str, client: &Client, sub_tx: &mpsc::Sender<String>) -> CommandResult {
    let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
    if parts.is_empty() || parts[0].is_empty() {
        return CommandResult::Ok;
    }

    match parts[0] {
        "quit" | "exit" | "q" => CommandResult::Quit,

        "send" => {
            if parts.len() < 3 {
                return CommandResult::Error("Usage: send <destination> <message>".to_string());
            }
            let command = Command::send(parts[1])
                .and_then(|c| c.content_type("text/plain"))
                .and_then(|c| c.body(parts[2]));
            let command = match command {
                Ok(c) => c,
                Err(e) => return CommandResult::Error(format!("Invalid message: {}", e)),
            };
            match client.send(command).await {
                Ok(()) => CommandResult::Ok,
                Err(e) => CommandResult::Error(format!("Send error: {}", e)),
            }
        }

        "sub" | "subscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: sub <destination>".to_string());
            }
            if sub_tx.send(parts[1].to_string()).await.is_err() {
                return CommandResult::Error("Failed to request subscription".to_string());
            }
            CommandResult::Ok
        }

        "unsub" | "unsubscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: unsub <subscription-id>".to_string());
            }
            match client.unsubscribe(parts[1]).await {
                Ok(()) => CommandResult::Info(format!("Unsubscribed: {}", parts[1])),
                Err(e) => CommandResult::Error(format!("Unsubscribe error: {}", e)),
            }
        }

        "session" => match client.session().await {
            Ok(session) if session.is_empty() => CommandResult::Info("No session".to_string()),
            Ok(session) => CommandResult::Info(format!("Session: {}", session)),
            Err(e) => CommandResult::Error(e.to_string()),
        },

        "about" => CommandResult::Info(format!(
            "stomp-engine v{} - MIT License",
            env!("CARGO_PKG_VERSION")
        )),

        "help" | "?" => {
            print_help();
            CommandResult::Ok
        }

        _ => CommandResult::Error(format!("Unknown command: {}. Type 'help' for commands.", parts[0])),
    }
}

/// Print help text
pub fn print_help() {
    println!("Commands:");
    println!("  send <destination> <message>  - Send a message");
    println!("  sub <destination>             - Subscribe to a destination");
    println!("  unsub <subscription-id>       - Cancel a subscription");
    println!("  session                       - Show the broker session id");
    println!("  about                         - Show version and license");
    println!("  quit                          - Disconnect and exit");
}
