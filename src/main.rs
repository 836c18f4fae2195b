use std::fs::{self, File};
use std::path::PathBuf;

use anyhow::{Context, Result};
use ractor::Actor;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

use blogpub::activity_pub::{
    ActorRegistry, DeliveryScheduler, DeliveryWorker, DeliveryWorkerInit, FollowerRegistry, Inbox,
    LogNotifier, Mailman, Outbox,
};
use blogpub::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let flags = xflags::parse_or_exit! {
        /// Path to the configuration file
        optional -c,--config PATH: PathBuf
    };
    let config_path = flags
        .config
        .unwrap_or_else(|| PathBuf::from("blogpub.toml"));
    let config = Config::load(&config_path)?;

    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("cannot create data dir {:?}", config.data_dir))?;
    // One engine per data dir
    let mut dir_lock = fd_lock::RwLock::new(File::create(config.data_dir.join("lock"))?);
    let _dir_guard = dir_lock
        .try_write()
        .context("another instance is already running against this data dir")?;
    let keyspace = fjall::Config::new(config.data_dir.join("store")).open()?;

    let mailman = Mailman::new();
    let registry = ActorRegistry::new(config.clone(), &keyspace, mailman.clone())?;
    let followers = FollowerRegistry::new(&keyspace, registry)?;

    let (worker, worker_handle) = Actor::spawn(
        Some("delivery".into()),
        DeliveryWorker::default(),
        DeliveryWorkerInit {
            config: config.clone(),
            keyspace: keyspace.clone(),
            followers: followers.clone(),
        },
    )
    .await?;
    let scheduler = DeliveryScheduler::new(worker.clone());
    let outbox = Outbox::new(config.clone(), &keyspace, scheduler)?;
    let _inbox = Inbox::new(config, &keyspace, followers, outbox, mailman, LogNotifier)?;
    info!("federation engine started");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received the terminate signal; stopping");
                break;
            }
            _ = sigint.recv() => {
                info!("Received the interrupt signal; stopping");
                break;
            }
        }
    }

    worker.stop(None);
    worker_handle.await?;

    Ok(())
}
