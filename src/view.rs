//! Presentation ordering for ledger snapshots.
//!
//! Pure functions; nothing here reads or writes the ledger.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

use crate::ledger::Source;

/// Order `records` for display to `current_user`.
///
/// Records held by `current_user` come first, then everything else. Each
/// group is sorted with [`natural_cmp`] on the path, falling back to the
/// record id so equal paths still have a stable order. An empty
/// `current_user` never matches, so unclaimed records are not hoisted.
pub fn project(records: &[Source], current_user: &str) -> Vec<Source> {
    let mut projected = records.to_vec();
    projected.sort_by(|a, b| {
        let a_own = is_own(a, current_user);
        let b_own = is_own(b, current_user);
        b_own
            .cmp(&a_own)
            .then_with(|| natural_cmp(&a.path, &b.path))
            .then_with(|| a.id.cmp(&b.id))
    });
    projected
}

fn is_own(source: &Source, current_user: &str) -> bool {
    !current_user.is_empty() && source.use_user == current_user
}

/// Keep records whose path contains `query`, ignoring case.
///
/// A blank query keeps everything.
pub fn filter(records: &[Source], query: &str) -> Vec<Source> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return records.to_vec();
    }
    records
        .iter()
        .filter(|source| source.path.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Case-insensitive comparison that orders digit runs by value.
///
/// `file2` sorts before `file10`, and `A.php` next to `a.php`. Strings
/// that compare equal this way are ordered by their raw bytes.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        let ordering = match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                cmp_digit_runs(&take_digits(&mut left), &take_digits(&mut right))
            },
            (Some(l), Some(r)) => {
                left.next();
                right.next();
                l.to_lowercase().cmp(r.to_lowercase())
            },
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        run.push(c);
    }
    run
}

/// Compare two digit runs by numeric value without parsing.
fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
    let a_trimmed = a.trim_start_matches('0');
    let b_trimmed = b.trim_start_matches('0');
    a_trimmed
        .len()
        .cmp(&b_trimmed.len())
        .then_with(|| a_trimmed.cmp(b_trimmed))
        // "007" after "7"
        .then_with(|| a.len().cmp(&b.len()))
}
