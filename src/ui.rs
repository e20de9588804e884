//! Terminal output for the CLI.

use sourcelock::error::{Error, ErrorKind};
use sourcelock::ledger::Source;

/// Width of box separators.
const BOX_WIDTH: usize = 60;

const PATH_WIDTH: usize = 40;

/// Print an error box with a title and optional detail.
///
/// ```text
/// ============================================================
/// Store unavailable
/// ============================================================
///
/// <detail>
/// ```
pub fn print_error_box(title: &str, detail: Option<&str>) {
    eprintln!("\n{}", "=".repeat(BOX_WIDTH));
    eprintln!("{title}");
    eprintln!("{}", "=".repeat(BOX_WIDTH));

    if let Some(detail) = detail
        && !detail.is_empty()
    {
        eprintln!("\n{detail}");
    }
}

/// Report a failed command.
///
/// Expected outcomes (bad input, someone else holding a source) get a one
/// line message; store and configuration failures get the full chain in a
/// box.
pub fn print_failure(err: &anyhow::Error) {
    match err.downcast_ref::<Error>().map(Error::kind) {
        Some(
            ErrorKind::Validation
            | ErrorKind::Conflict
            | ErrorKind::NotFound
            | ErrorKind::Session,
        ) => {
            eprintln!("error: {err}");
        },
        Some(ErrorKind::Unavailable) => {
            print_error_box("Store unavailable", Some(&format!("{err:#}\n\nTry again shortly.")));
        },
        _ => print_error_box("sourcelock failed", Some(&format!("{err:#}"))),
    }
}

/// Print a one-line confirmation.
pub fn print_notice(message: &str) {
    println!("{message}");
}

/// Print configuration warnings.
pub fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
}

/// Print projected sources as a table, marking the ones `current_user` holds.
pub fn print_sources(sources: &[Source], current_user: &str) {
    println!("Sources ({})", sources.len());
    println!("{}", "=".repeat(BOX_WIDTH));

    if sources.is_empty() {
        println!("  (none)");
        return;
    }

    for source in sources {
        let marker = if !current_user.is_empty() && source.is_held_by(current_user) {
            '*'
        } else {
            ' '
        };
        let status = match source.owner() {
            Some(owner) => format!("in use by {owner}"),
            None => "free".to_string(),
        };
        println!(
            "{marker} {:<width$}  {status}",
            source.path,
            width = PATH_WIDTH
        );

        let mut details = vec![format!("id {}", source.id)];
        if !source.last_user.is_empty() {
            details.push(format!("last {}", source.last_user));
        }
        if !source.last_update_date.is_empty() {
            details.push(format!("updated {}", source.last_update_date));
        }
        println!("    {}", details.join(", "));
    }
}
