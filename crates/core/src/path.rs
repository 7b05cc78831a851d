//! Path-based descent through nested field values.
//!
//! Paths are dot-separated keys with optional bracketed indexes:
//! `user.roles[0]`, `request.headers.host`, `items.2.sku`.

use serde_json::Value;

/// Split a path into its key/index tokens. Returns `None` for malformed paths.
pub(crate) fn tokens(path: &str) -> Option<Vec<&str>> {
    let mut out = Vec::new();
    for part in path.split('.') {
        let (head, mut rest) = match part.find('[') {
            Some(i) => part.split_at(i),
            None => (part, ""),
        };
        if !head.is_empty() {
            out.push(head);
        } else if rest.is_empty() {
            return None;
        }
        while !rest.is_empty() {
            let inner = rest.strip_prefix('[')?;
            let end = inner.find(']')?;
            let index = &inner[..end];
            if index.is_empty() {
                return None;
            }
            out.push(index);
            rest = &inner[end + 1..];
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Follow `path` from `root`, navigating object keys and array indexes.
pub(crate) fn descend<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    tokens(path)?
        .into_iter()
        .try_fold(root, |value, token| match value {
            Value::Object(map) => map.get(token),
            Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}
