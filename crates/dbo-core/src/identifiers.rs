//! SQL identifier quoting and constraint naming.

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// # Examples
///
/// ```
/// use dbo_core::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name (`schema.table`).
///
/// Each dot-separated part is quoted on its own.
pub fn quote_table(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

/// Strip a schema qualifier, keeping the bare table name.
pub fn bare_table_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Build a foreign key constraint name that fits `max_len` characters.
///
/// Names take the form `fk_<table>_<name>`. When that is too long it is
/// truncated and suffixed with eight hex digits of a hash of the full name,
/// so distinct long names stay distinct.
pub fn constraint_name(table: &str, name: &str, max_len: usize) -> String {
    let full = format!("fk_{}_{}", bare_table_name(table), name);
    shorten_identifier(&full, max_len)
}

/// Truncate an identifier to `max_len` characters, appending a hash suffix.
pub fn shorten_identifier(full: &str, max_len: usize) -> String {
    if full.chars().count() <= max_len {
        return full.to_string();
    }
    let suffix = format!("_{:08x}", fnv1a(full.as_bytes()));
    let keep = max_len.saturating_sub(suffix.len());
    let mut shortened: String = full.chars().take(keep).collect();
    shortened.push_str(&suffix);
    shortened
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in bytes {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
