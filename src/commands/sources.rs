//! Commands that change a single source.

use anyhow::Result;

use sourcelock::identity::Session;
use sourcelock::ledger::{Ledger, RootPath};
use sourcelock::ownership::ClaimService;

use crate::ui;

pub async fn add(ledger: Ledger, root: RootPath, subpath: &str) -> Result<()> {
    let source = ClaimService::new(ledger).add(root, subpath).await?;
    ui::print_notice(&format!("Added {} ({})", source.path, source.id));
    Ok(())
}

/// Claim a free source or release one the session holds.
pub async fn check(ledger: Ledger, session: &Session, id: &str) -> Result<()> {
    let outcome = ClaimService::new(ledger).toggle(session, id).await?;
    ui::print_notice(&outcome.notice(session.user()));
    Ok(())
}

pub async fn release(ledger: Ledger, session: &Session, id: &str) -> Result<()> {
    let source = ClaimService::new(ledger).release(session, id).await?;
    ui::print_notice(&format!("{} released {}", session.user(), source.path));
    Ok(())
}

pub async fn handoff(ledger: Ledger, session: &Session, id: &str, to: &str) -> Result<()> {
    let source = ClaimService::new(ledger).handoff(session, id, to).await?;
    ui::print_notice(&format!(
        "{} handed {} to {}",
        session.user(),
        source.path,
        source.use_user
    ));
    Ok(())
}

pub async fn delete(ledger: Ledger, id: &str) -> Result<()> {
    if ClaimService::new(ledger).delete(id).await? {
        ui::print_notice(&format!("Deleted {id}"));
    } else {
        ui::print_notice(&format!("Nothing to delete: {id} was already gone"));
    }
    Ok(())
}
