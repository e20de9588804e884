//! CLI command implementations for sourcelock.
//!
//! - [`session`] - `login`, `logout`, `whoami`
//! - [`sources`] - `add`, `check`, `release`, `handoff`, `delete`
//! - [`list`] - `list` and live `watch`

pub mod list;
pub mod session;
pub mod sources;

use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

use sourcelock::config::Config;
use sourcelock::identity::{Session, SessionCache};
use sourcelock::ledger::Ledger;
use sourcelock::paths;

use crate::{Cli, Command, ui};

/// Dispatch a parsed command line.
pub async fn execute(cli: Cli) -> Result<()> {
    let cache = SessionCache::new(paths::get_session_path()?);
    let config_path = cli.config.as_deref();

    match cli.command {
        // Local-only commands never open the store.
        Command::Logout => session::logout(&cache),
        Command::Whoami => session::whoami(&cache),
        Command::Login { name } => {
            let config = load_config(config_path)?;
            let ledger = open_ledger(&config)?;
            session::login(ledger, &config, &cache, &name).await
        },
        Command::Add { root, subpath } => {
            sources::add(open_store(config_path)?, root, &subpath).await
        },
        Command::List { search } => {
            list::list(open_store(config_path)?, &cache, search.as_deref()).await
        },
        Command::Check { id } => {
            let ledger = open_store(config_path)?;
            sources::check(ledger, &require_session(&cache)?, &id).await
        },
        Command::Release { id } => {
            let ledger = open_store(config_path)?;
            sources::release(ledger, &require_session(&cache)?, &id).await
        },
        Command::Handoff { id, to } => {
            let ledger = open_store(config_path)?;
            sources::handoff(ledger, &require_session(&cache)?, &id, &to).await
        },
        Command::Delete { id } => sources::delete(open_store(config_path)?, &id).await,
        Command::Watch { search } => {
            list::watch(open_store(config_path)?, &cache, search.as_deref()).await
        },
    }
}

/// Load and validate configuration, printing any warnings.
fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let config = Config::load(explicit)?;
    let validation = config.validate()?;
    if validation.has_warnings() {
        ui::print_warnings(&validation.warnings);
    }
    debug!(backend = ?config.store.backend, "Configuration loaded");
    Ok(config)
}

fn open_store(explicit: Option<&Path>) -> Result<Ledger> {
    open_ledger(&load_config(explicit)?)
}

fn open_ledger(config: &Config) -> Result<Ledger> {
    let ledger = Ledger::from_config(&config.store).context("Failed to open the ledger")?;
    Ok(ledger.with_poll_interval(config.watch.poll_interval()))
}

fn require_session(cache: &SessionCache) -> Result<Session> {
    let session = cache.load();
    Ok(Session::require(session.as_ref())?.clone())
}
