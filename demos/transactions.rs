use stomp_engine::{Client, Command, ConnectOptions, Endpoint};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // This example expects a STOMP broker on localhost:61613 (e.g. RabbitMQ with stomp plugin).

    let (client, _driver) = Client::spawn(ConnectOptions::default());
    client
        .login(Endpoint::new("127.0.0.1", 61613), "guest", "guest")
        .await?;

    // Begin a transaction
    let tx_id = "tx-example-1";
    client.begin(tx_id).await?;
    println!("Transaction {} started", tx_id);

    // Send messages within the transaction
    for n in 1..=2 {
        let msg = Command::send("/queue/test")?
            .transaction(tx_id)?
            .body(format!("message {} in transaction", n))?;
        client.send(msg).await?;
        println!("Sent message {} in transaction", n);
    }

    // Commit the transaction (both messages will be delivered atomically)
    client.commit(tx_id).await?;
    println!("Transaction {} committed", tx_id);

    // Example of aborting a transaction
    let tx_id_2 = "tx-example-2";
    client.begin(tx_id_2).await?;
    println!("\nTransaction {} started", tx_id_2);

    let msg = Command::send("/queue/test")?
        .transaction(tx_id_2)?
        .body("this message will be aborted")?;
    client.send(msg).await?;
    println!("Sent message in transaction {} (will be aborted)", tx_id_2);

    // Abort the transaction (message will not be delivered)
    client.abort(tx_id_2).await?;
    println!("Transaction {} aborted", tx_id_2);

    client.disconnect().await?;

    Ok(())
}
