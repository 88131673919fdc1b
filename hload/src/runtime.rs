use core::future;
use std::error::Error;

use crate::{cfg::Config, client::HttpClient, engine::Engine, report};

#[derive(Debug)]
pub struct Runtime {
    cfg: Config,
}

impl Runtime {
    pub fn new(cfg: Config) -> Self {
        Self { cfg }
    }

    /// Runs the load, then prints the report to stdout.
    ///
    /// Ctrl-C stops the load early, the partial report is still printed.
    pub async fn run(self) -> Result<(), Box<dyn Error>> {
        let Config { engine, client, format, .. } = self.cfg;

        log::info!("{} {} with concurrency {}", client.method, client.uri, engine.concurrency);
        let client = HttpClient::new(client)?;
        let engine = Engine::new(engine, client);
        let results = engine.results();

        let status = engine.run(interrupted()).await;

        let summary = results.summarize()?;
        println!("{}", report::render(&summary, status, format)?);

        Ok(())
    }
}

/// Resolves on Ctrl-C.
///
/// Never resolves if the signal handler cannot be installed.
async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::warn!("interrupted, finishing the run"),
        Err(err) => {
            log::error!("failed to listen for interrupts: {err}");
            future::pending::<()>().await;
        }
    }
}
