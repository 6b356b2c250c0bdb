//! Reference name validation following git-style conventions.
//!
//! Valid reference names:
//! - Must be non-empty
//! - Must not contain whitespace, control characters, `~`, `^`, `:`, `?`,
//!   `*`, `[`, `\`
//! - Must not contain `..` (double dot) or `@{`
//! - Must not start or end with `/`, or end with `.`
//! - Must not end with `.lock`
//! - Components between slashes must be non-empty and not start with `.`
//! - Must live under `refs/`, unless it is a root reference such as `HEAD`
//!   or `FETCH_HEAD`

use crate::error::{RefError, RefResult};

/// Prefix shared by every reference that is not a root reference.
pub const REFS_PREFIX: &str = "refs/";

/// Characters that are forbidden anywhere in a reference name.
const FORBIDDEN_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];

fn invalid(name: &str, reason: impl Into<String>) -> RefError {
    RefError::InvalidName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Whether `name` is a root reference: `HEAD` or an all-caps `*_HEAD`
/// name such as `FETCH_HEAD` or `ORIG_HEAD`.
pub fn is_root_ref(name: &str) -> bool {
    name == "HEAD"
        || (name.ends_with("_HEAD")
            && name.bytes().all(|b| b.is_ascii_uppercase() || b == b'_'))
}

/// Validate a full reference name such as `refs/heads/main` or `HEAD`.
///
/// # Examples
///
/// ```
/// use tessera_refs::names::validate_reference_name;
///
/// assert!(validate_reference_name("refs/heads/feature/auth").is_ok());
/// assert!(validate_reference_name("HEAD").is_ok());
/// assert!(validate_reference_name("").is_err());
/// assert!(validate_reference_name("config").is_err());
/// assert!(validate_reference_name("refs/heads/bad..name").is_err());
/// ```
pub fn validate_reference_name(name: &str) -> RefResult<()> {
    if name.is_empty() {
        return Err(invalid(name, "name must not be empty"));
    }

    if let Some(ch) = name
        .chars()
        .find(|ch| ch.is_whitespace() || ch.is_control() || FORBIDDEN_CHARS.contains(ch))
    {
        return Err(invalid(name, format!("contains forbidden character: {ch:?}")));
    }

    if name.contains("..") {
        return Err(invalid(name, "must not contain '..'"));
    }

    if name.contains("@{") {
        return Err(invalid(name, "must not contain '@{'"));
    }

    if name.starts_with('/') || name.ends_with('/') {
        return Err(invalid(name, "must not start or end with '/'"));
    }

    if name.ends_with('.') {
        return Err(invalid(name, "must not end with '.'"));
    }

    if name.ends_with(".lock") {
        return Err(invalid(name, "must not end with '.lock'"));
    }

    for component in name.split('/') {
        if component.is_empty() {
            return Err(invalid(name, "path components must not be empty"));
        }
        if component.starts_with('.') {
            return Err(invalid(
                name,
                format!("component must not start with '.': {component:?}"),
            ));
        }
    }

    if !name.starts_with(REFS_PREFIX) && !is_root_ref(name) {
        return Err(invalid(name, "must be under 'refs/' or be a root reference"));
    }

    Ok(())
}
