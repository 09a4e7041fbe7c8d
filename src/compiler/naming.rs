//! Deterministic resource names: a sanitized readable part plus a short
//! blake3 digest of the identity, so regeneration updates rather than duplicates.

use crate::node::StorageNode;
use crate::step::TransformStep;

const DIGEST_LEN: usize = 8;

/// Lowercases and replaces anything outside `[a-z0-9]` with `sep`, collapsing
/// repeats and trimming to `max_len`.
pub fn sanitize(raw: &str, max_len: usize, sep: char) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with(sep) {
            out.push(sep);
        }
    }
    out.truncate(max_len);
    let trimmed = out.trim_end_matches(sep);
    if trimmed.is_empty() {
        "node".to_string()
    } else {
        trimmed.to_string()
    }
}

/// First hex characters of the blake3 hash of `input`.
pub fn digest(input: &str) -> String {
    let hash = blake3::hash(input.as_bytes()).to_hex();
    hash.as_str()[..DIGEST_LEN].to_string()
}

/// `<name>-<digest(location)>`, at most `max_len` characters.
pub fn storage_name(node: &StorageNode, max_len: usize, sep: char) -> String {
    let budget = max_len.saturating_sub(DIGEST_LEN + 1).max(1);
    format!("{}{}{}", sanitize(node.name(), budget, sep), sep, digest(node.location()))
}

/// `<task>-<output>-<digest(output identity)>`. Keyed by the output node
/// because a node has exactly one producer.
pub fn step_name(step: &TransformStep, max_len: usize, sep: char) -> String {
    let output = step.output();
    let budget = max_len.saturating_sub(DIGEST_LEN + 1).max(1);
    let readable = format!("{}-{}", step.task().name(), output.name());
    format!(
        "{}{}{}",
        sanitize(&readable, budget, sep),
        sep,
        digest(&format!("{}|{}", output.name(), output.location()))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Orders Clean!!v2", 63, '-'), "orders-clean-v2");
        assert_eq!(sanitize("__x__", 63, '_'), "x");
        assert_eq!(sanitize("***", 63, '-'), "node");
        assert_eq!(sanitize("abcdef-ghij", 7, '-'), "abcdef");
    }

    #[test]
    fn test_storage_name_is_stable_and_bounded() {
        let node = StorageNode::new("A very long storage node name that will not fit", "s3://lake/x");
        let first = storage_name(&node, 30, '-');
        assert_eq!(first, storage_name(&node, 30, '-'));
        assert!(first.len() <= 30);

        let other = StorageNode::new("A very long storage node name that will not fit", "s3://lake/y");
        assert_ne!(first, storage_name(&other, 30, '-'));
    }
}
