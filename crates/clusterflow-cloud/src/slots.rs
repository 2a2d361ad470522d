//! Ordinal slot allocation for groups of same-named resources

/// Smallest non-negative ordinal not present in `used`.
///
/// Gaps left by deleted resources are reused before growing past the
/// largest ordinal.
pub fn find_first_free_index(used: &[usize]) -> usize {
    let mut sorted = used.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut next = 0;
    for index in sorted {
        if index != next {
            break;
        }
        next += 1;
    }
    next
}

/// Parse the ordinal of `<prefix>-<n>`.
pub fn ordinal_suffix(name: &str, prefix: &str) -> Option<usize> {
    name.strip_prefix(prefix)?.strip_prefix('-')?.parse().ok()
}

/// `<prefix>-<n>`
pub fn ordinal_name(prefix: &str, index: usize) -> String {
    format!("{}-{}", prefix, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_first_free_index() {
        let cases: &[(&[usize], usize)] = &[
            (&[0, 2, 1], 3),
            (&[1, 2, 4], 0),
            (&[4, 5, 2, 3, 0], 1),
            (&[0, 1, 2, 3], 4),
            (&[], 0),
            (&[0, 0, 1], 2),
        ];
        for (used, expected) in cases {
            assert_eq!(find_first_free_index(used), *expected, "used = {:?}", used);
        }
    }

    #[test]
    fn test_ordinal_suffix() {
        assert_eq!(ordinal_suffix("nodes-fr-par-1-3", "nodes-fr-par-1"), Some(3));
        assert_eq!(ordinal_suffix("nodes-fr-par-1", "nodes-fr-par-1"), None);
        assert_eq!(ordinal_suffix("nodes-fr-par-1-x", "nodes-fr-par-1"), None);
        assert_eq!(ordinal_suffix("control-plane-0", "nodes"), None);
        assert_eq!(ordinal_name("nodes", 2), "nodes-2");
    }
}
