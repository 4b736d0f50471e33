use std::time::Duration;

use stomp_engine::{AckMode, Client, Command, ConnectOptions, Endpoint};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // This example expects a STOMP broker on localhost:61613 (e.g. RabbitMQ with stomp plugin).

    let (client, _driver) = Client::spawn(ConnectOptions::default());
    let connected = client
        .login(Endpoint::new("127.0.0.1", 61613), "guest", "guest")
        .await?;
    println!("logged on:\n{}", connected);

    let mut sub = client.subscribe("/queue/test", AckMode::Client).await?;

    let msg = Command::send("/queue/test")?.body("hello from stomp-engine example")?;
    let receipt = client.send_confirmed(msg, Duration::from_secs(5)).await?;
    println!("broker confirmed:\n{}", receipt);

    // Wait for the message to come back, but don't block forever.
    match tokio::time::timeout(Duration::from_secs(5), sub.recv()).await {
        Ok(Some(frame)) => {
            println!("received frame:\n{}", frame);
            sub.ack(&frame).await?;
        }
        Ok(None) => println!("subscription closed, no frames received"),
        Err(_) => println!("timed out waiting for a frame"),
    }

    // Unsubscribes, sends DISCONNECT and waits for its receipt.
    client.disconnect().await?;

    Ok(())
}
