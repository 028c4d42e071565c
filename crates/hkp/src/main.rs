use std::sync::Arc;

use anyhow::Context;
use hkp_core::{config::Config, service::HitokotoService};
use hkp_hitokoto::HitokotoClient;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

mod console;

use console::Command;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hkp_core::logging::init("hkp")?;

    let cfg = Arc::new(Config::load()?);
    let client = HitokotoClient::new(cfg.api_url.clone(), cfg.fetch_timeout)?;
    let svc = HitokotoService::new(cfg.clone(), Arc::new(client));
    svc.start().await.context("starting hitokoto service")?;

    let user = std::env::var("USER").unwrap_or_else(|_| "local".to_string());
    info!(user = %user, data_dir = %cfg.data_dir.display(), "console ready, /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            line = lines.next_line() => line.context("reading stdin")?,
        };

        let Some(line) = line else {
            break; // EOF
        };
        let Some(parsed) = console::parse_line(&line) else {
            continue;
        };
        if parsed.command == Command::Quit {
            break;
        }

        let caller = console::caller_for(&user, parsed.group);
        let reply = console::handle(&svc, &caller, parsed.command).await;
        println!("{reply}\n");
    }

    svc.shutdown().await.context("shutting down")?;
    Ok(())
}
