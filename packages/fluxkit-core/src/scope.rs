//! Key-prefix helpers shared by scoped cache wrappers.

/// Default separator placed between a scope and the key it prefixes.
pub const SCOPE_SEPARATOR: &str = ":";

/// Prefixes `key` with `scope` and [`SCOPE_SEPARATOR`].
///
/// An empty scope produces no prefix, so a `ScopedCache` with an empty scope
/// behaves like a transparent passthrough.
#[must_use]
pub fn scoped_key(scope: &str, key: &str) -> String {
    if scope.is_empty() {
        key.to_string()
    } else {
        format!("{scope}{SCOPE_SEPARATOR}{key}")
    }
}

/// The prefix a scope maps to, used for `RemoveByPrefix` / bulk-flush calls.
#[must_use]
pub fn scope_prefix(scope: &str) -> String {
    if scope.is_empty() {
        String::new()
    } else {
        format!("{scope}{SCOPE_SEPARATOR}")
    }
}
