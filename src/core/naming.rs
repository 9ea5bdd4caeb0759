//! core::naming
//!
//! Node naming rules and collision handling.
//!
//! # Features
//!
//! - Validate node names (disallowed characters, including percent-encoded forms)
//! - Find the first free `name-N` variant when a sibling already uses a name
//! - Derive page names from sitemap paths

use super::types::TypeError;

/// Characters that may never appear in a node name.
pub const DISALLOWED_CHARS: [char; 6] = [':', '/', '?', ';', '#', '\\'];

/// Percent-encoded forms of [`DISALLOWED_CHARS`], upper-cased.
const DISALLOWED_ENCODED: [&str; 6] = ["%3A", "%2F", "%3F", "%3B", "%23", "%5C"];

/// Validate a single node name.
///
/// # Errors
///
/// Returns `TypeError::InvalidName` when the name:
/// - is empty or only whitespace
/// - is `.` or `..`
/// - contains `:`, `/`, `?`, `;`, `#` or `\`, or their percent-encoded forms
///   (matched case-insensitively)
/// - contains control characters
///
/// # Example
///
/// ```
/// use sitestage::core::naming::validate_name;
///
/// assert!(validate_name("news").is_ok());
/// assert!(validate_name("news;2").is_err());
/// assert!(validate_name("news%2fold").is_err());
/// ```
pub fn validate_name(name: &str) -> Result<(), TypeError> {
    if name.trim().is_empty() {
        return Err(TypeError::InvalidName("name cannot be empty".into()));
    }

    if name == "." || name == ".." {
        return Err(TypeError::InvalidName(format!("'{name}' is reserved")));
    }

    for c in DISALLOWED_CHARS {
        if name.contains(c) {
            return Err(TypeError::InvalidName(format!(
                "name '{name}' cannot contain '{c}'"
            )));
        }
    }

    let upper = name.to_ascii_uppercase();
    for encoded in DISALLOWED_ENCODED {
        if upper.contains(encoded) {
            return Err(TypeError::InvalidName(format!(
                "name '{name}' cannot contain encoded '{encoded}'"
            )));
        }
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(TypeError::InvalidName(
            "name cannot contain control characters".into(),
        ));
    }

    Ok(())
}

/// Format the `n`-th collision variant of `base`.
pub fn suffixed(base: &str, n: u32) -> String {
    format!("{base}-{n}")
}

/// Find a free name for a new sibling.
///
/// Returns `base` if it is free, otherwise the first of `base-1`, `base-2`,
/// ... that `is_taken` rejects. Returns `None` when every suffix up to
/// `max_suffix` is taken.
///
/// # Example
///
/// ```
/// use sitestage::core::naming::next_free_name;
///
/// let taken = ["foo", "foo-1"];
/// let name = next_free_name("foo", |n| taken.contains(&n), 100);
/// assert_eq!(name.as_deref(), Some("foo-2"));
/// ```
pub fn next_free_name<F>(base: &str, is_taken: F, max_suffix: u32) -> Option<String>
where
    F: Fn(&str) -> bool,
{
    if !is_taken(base) {
        return Some(base.to_string());
    }
    (1..=max_suffix)
        .map(|n| suffixed(base, n))
        .find(|candidate| !is_taken(candidate))
}

/// Derive a page name from the path of the sitemap item it backs.
///
/// Segments are joined with `-`, so `news/archive` becomes `news-archive`.
pub fn page_name_for<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    segments.into_iter().collect::<Vec<_>>().join("-")
}
