use crate::util::is_comment;
use std::collections::HashSet;

/// Concatenate chunk outputs in order, dropping repeated rules.
///
/// Blank and comment lines are always kept. Other lines are kept the first time they are seen
/// (exact equality). Returns the merged lines and how many were dropped.
pub fn merge_chunks<S: AsRef<str>>(chunk_outputs: &[Vec<S>]) -> (Vec<String>, usize) {
    log::info!("Merging {} chunks...", chunk_outputs.len());

    let total: usize = chunk_outputs.iter().map(Vec::len).sum();
    log::debug!("Total lines before deduplication: {total}");

    let mut seen: HashSet<&str> = HashSet::with_capacity(total);
    let mut merged = Vec::with_capacity(total);
    for line in chunk_outputs.iter().flatten().map(|line| line.as_ref()) {
        if line.trim().is_empty() || is_comment(line) || seen.insert(line) {
            merged.push(line.to_string());
        }
    }

    let duplicates_removed = total - merged.len();
    log::info!(
        "Merged to {} lines (removed {duplicates_removed} duplicates)",
        merged.len()
    );
    (merged, duplicates_removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn removes_cross_chunk_duplicates() {
        let (merged, removed) = merge_chunks(&[vec!["a", "b"], vec!["a", "c"]]);
        assert_eq!(merged, vec!["a", "b", "c"]);
        assert_eq!(removed, 1);
    }

    #[test]
    fn comments_are_never_deduplicated() {
        let (merged, removed) = merge_chunks(&[vec!["! note", "x"], vec!["! note", "y"]]);
        assert_eq!(merged, vec!["! note", "x", "! note", "y"]);
        assert_eq!(removed, 0);
    }

    #[test]
    fn blanks_and_hash_comments_survive() {
        let (merged, removed) =
            merge_chunks(&[vec!["", "# h", "r"], vec!["", "  # h", "r", "r "]]);
        assert_eq!(merged, vec!["", "# h", "r", "", "  # h", "r "]);
        assert_eq!(removed, 1);
    }

    #[test]
    fn empty_input() {
        let (merged, removed) = merge_chunks::<String>(&[]);
        assert!(merged.is_empty());
        assert_eq!(removed, 0);
    }

    fn line() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-c]{1,2}",
            Just(String::new()),
            Just("! c".to_string()),
            Just("# h".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn merge_keeps_an_ordered_subsequence(
            chunks in prop::collection::vec(prop::collection::vec(line(), 0..12), 0..6)
        ) {
            let (merged, removed) = merge_chunks(&chunks);
            let flat: Vec<&String> = chunks.iter().flatten().collect();
            prop_assert_eq!(merged.len() + removed, flat.len());

            let mut it = flat.iter();
            for kept in &merged {
                prop_assert!(it.any(|l| *l == kept), "{} out of order", kept);
            }

            let mut rules = HashSet::new();
            for kept in merged.iter().filter(|l| crate::util::is_rule(l)) {
                prop_assert!(rules.insert(kept.clone()), "{} kept twice", kept);
            }
        }
    }
}
