//! `login`, `logout` and `whoami`.

use anyhow::Result;

use sourcelock::config::Config;
use sourcelock::identity::{IdentityRegistry, Session, SessionCache};
use sourcelock::ledger::Ledger;

use crate::ui;

/// Register (or re-activate) `name` and remember it locally.
pub async fn login(
    ledger: Ledger,
    config: &Config,
    cache: &SessionCache,
    name: &str,
) -> Result<()> {
    let registry = IdentityRegistry::new(ledger, config.identity.reentry);
    let identity = registry.claim_identity(name).await?;

    cache.store(&Session::new(identity.name.clone()))?;

    ui::print_notice(&format!("Welcome, {}", identity.name));
    Ok(())
}

/// Forget the local session. The registry entry is kept.
pub fn logout(cache: &SessionCache) -> Result<()> {
    match cache.load() {
        Some(session) => {
            cache.clear()?;
            ui::print_notice(&format!("Logged out {}", session.user()));
        },
        None => ui::print_notice("Not logged in"),
    }
    Ok(())
}

pub fn whoami(cache: &SessionCache) -> Result<()> {
    let session = cache.load();
    let session = Session::require(session.as_ref())?;
    ui::print_notice(session.user());
    Ok(())
}
