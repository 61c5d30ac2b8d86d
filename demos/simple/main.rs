use flagwire::{ClientEvent, Identity};

#[tokio::main]
pub async fn main() {
    let _ = env_logger::builder().try_init();

    let environment_id =
        std::env::var("FLAGWIRE_ENVIRONMENT_ID").expect("FLAGWIRE_ENVIRONMENT_ID must be set");
    let client = flagwire::ClientConfig::new(environment_id)
        .to_client(Identity::new("test-subject").with_country("NL"))
        .unwrap();

    // Listening for changes opens the live update stream.
    client.on("change:a-boolean-flag", |event| {
        if let ClientEvent::FlagChange { current, .. } = event {
            println!("a-boolean-flag changed to {current:?}");
        }
    });

    // Until initialization completes, the client returns the default for all flags.
    if let Err(err) = client.wait_for_initialization().await {
        println!("Failed to initialize: {err}");
    }

    let enabled = client
        .variation("a-boolean-flag", false)
        .as_bool()
        // default value
        .unwrap_or(false);
    println!("Value: {:?}", enabled);

    client.close().await;
}
