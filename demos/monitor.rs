use std::env;
use std::sync::Arc;
use std::time::Duration;

use thermo_sync::{Config, FieldValue, MemoryStore, StateStore, SyncService};

#[tokio::main]
async fn main() -> thermo_sync::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("usage: monitor <config.json> [<device>.<code>=<value>]");
        std::process::exit(2);
    };

    let config = Config::from_file(path)?;
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn StateStore> = store.clone();
    let mut service = SyncService::from_config(&config, dyn_store)?;

    if let Some(stats) = service.poll_now().await? {
        println!("Initial poll: {stats:?}");
    }

    if let Some((key, raw)) = args.get(2).and_then(|a| a.split_once('=')) {
        let value = match raw.parse::<f64>() {
            Ok(n) => FieldValue::Number(n),
            Err(_) => match raw {
                "true" => FieldValue::Bool(true),
                "false" => FieldValue::Bool(false),
                other => FieldValue::Text(other.to_string()),
            },
        };
        println!("Writing {key} = {value}");
        service.on_local_write(key, value).await?;
    }

    let period = service.start_polling(config.poll_interval_secs);
    println!("Polling every {}s", period.as_secs());

    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        let engine = service.engine().lock();
        println!(
            "store writes: {} | polling gated: {}",
            store.write_count(),
            !engine.poll_allowed(std::time::Instant::now())
        );
    }
}
