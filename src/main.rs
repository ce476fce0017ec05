use std::sync::Arc;

use kiln::config::Config;
use kiln::logging;
use kiln::server::Server;
use kiln::store::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;
    let _log_guard = logging::init(&cfg.log);

    let store = Arc::new(MemoryStore::from_users(&cfg.users));
    if store.is_empty() {
        tracing::info!("No seeded users; accounts come from /register.html");
    } else {
        tracing::info!(users = store.len(), "Credential store seeded");
    }
    let server = Server::bind(&cfg, store)?;
    let handle = server.handle();

    let mut reactor = tokio::task::spawn_blocking(move || server.run());

    tokio::select! {
        res = &mut reactor => {
            res??;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            handle.shutdown();
            reactor.await??;
        }
    }

    Ok(())
}
