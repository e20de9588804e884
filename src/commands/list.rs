//! `list` and `watch`.

use anyhow::{Context, Result};
use tracing::info;

use sourcelock::identity::SessionCache;
use sourcelock::ledger::{Ledger, LedgerEvent, Snapshot};
use sourcelock::view;

use crate::ui;

/// Print the ledger once.
pub async fn list(ledger: Ledger, cache: &SessionCache, search: Option<&str>) -> Result<()> {
    let user = current_user(cache);
    let snapshot = ledger.snapshot().await?;
    print_snapshot(&snapshot, &user, search);
    Ok(())
}

/// Print every new snapshot until Ctrl-C.
pub async fn watch(ledger: Ledger, cache: &SessionCache, search: Option<&str>) -> Result<()> {
    let user = current_user(cache);
    let mut subscription = ledger.subscribe();
    info!(backend = ledger.backend_name(), "Watching ledger");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            },
            event = subscription.next() => match event {
                Some(LedgerEvent::Snapshot(snapshot)) => {
                    println!();
                    print_snapshot(&snapshot, &user, search);
                },
                Some(LedgerEvent::Unavailable { message }) => {
                    eprintln!("warning: ledger unavailable, retrying: {message}");
                },
                None => break,
            },
        }
    }

    subscription.cancel();
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot, user: &str, search: Option<&str>) {
    let visible = view::filter(&snapshot.sources, search.unwrap_or_default());
    ui::print_sources(&view::project(&visible, user), user);
}

/// The logged-in name, or empty when viewing anonymously.
fn current_user(cache: &SessionCache) -> String {
    cache
        .load()
        .map(|session| session.user().to_string())
        .unwrap_or_default()
}
