use std::collections::BTreeSet;

use crate::captions::CaptionStore;

/// Scenes whose caption contains the keyword, case-insensitive. Results
/// follow store order (ascending scene index).
pub fn search_basic(captions: &CaptionStore, keyword: &str) -> Vec<u32> {
    let keyword = keyword.to_lowercase();
    captions
        .iter()
        .filter(|(_, caption)| caption.to_lowercase().contains(&keyword))
        .map(|(scene, _)| scene)
        .collect()
}

/// Fuzzy similarity between two strings on a 0-100 scale, derived from the
/// Levenshtein edit distance. 100 means equal (ignoring case), 0 means
/// nothing in common.
pub fn similarity(a: &str, b: &str) -> u32 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();

    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 100;
    }

    let distance = levenshtein::levenshtein(&a, &b);
    let score = 100.0 * (1.0 - distance as f64 / max_len as f64);
    score.round().max(0.0) as u32
}

/// Best-match score of a query against a single caption: the highest
/// similarity between the query and any caption word (or the caption as a
/// whole).
pub fn best_match_score(query: &str, caption: &str) -> u32 {
    let whole = similarity(query, caption);
    tokenize(caption)
        .map(|word| similarity(query, word))
        .fold(whole, u32::max)
}

/// Scenes whose best-match score meets the cutoff (0-100). One independent
/// comparison per caption; results follow store order, not score order.
pub fn search_advanced(captions: &CaptionStore, query: &str, cutoff: u32) -> Vec<u32> {
    captions
        .iter()
        .filter(|(_, caption)| best_match_score(query, caption) >= cutoff)
        .map(|(scene, _)| scene)
        .collect()
}

fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

/// The word vocabulary of all captions, for interactive prefix suggestions.
/// Not part of retrieval.
#[derive(Debug, Default)]
pub struct CaptionVocabulary {
    words: BTreeSet<String>,
}

impl CaptionVocabulary {
    pub fn from_store(captions: &CaptionStore) -> Self {
        let words = captions
            .iter()
            .flat_map(|(_, caption)| tokenize(caption).map(str::to_lowercase))
            .collect();
        Self { words }
    }

    /// Up to `limit` vocabulary words starting with `prefix`, in
    /// alphabetical order.
    pub fn suggest(&self, prefix: &str, limit: usize) -> Vec<String> {
        let prefix = prefix.to_lowercase();
        self.words
            .range(prefix.clone()..)
            .take_while(|word| word.starts_with(&prefix))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> CaptionStore {
        let mut store = CaptionStore::default();
        store.insert(1, "A red car driving down the road".to_string());
        store.insert(2, "A park with green trees".to_string());
        store.insert(3, "Two cars parked near a cart".to_string());
        store
    }

    #[test]
    fn test_search_basic_substring() {
        let store = sample_store();
        assert_eq!(search_basic(&store, "car"), vec![1, 3]);
        assert_eq!(search_basic(&store, "park"), vec![2, 3]);
        assert_eq!(search_basic(&store, "CAR"), vec![1, 3]);
        assert!(search_basic(&store, "submarine").is_empty());
    }

    #[test]
    fn test_similarity_scale() {
        assert_eq!(similarity("car", "car"), 100);
        assert_eq!(similarity("car", "CAR"), 100);
        assert_eq!(similarity("", ""), 100);
        assert_eq!(similarity("abc", "xyz"), 0);
        assert!(similarity("car", "cart") > 60);
    }

    #[test]
    fn test_cutoff_zero_returns_everything() {
        let store = sample_store();
        let matches = search_advanced(&store, "car", 0);
        assert_eq!(matches, vec![1, 2, 3]);
    }

    #[test]
    fn test_cutoff_hundred_only_exact_words() {
        let store = sample_store();
        // "car" appears as an exact word only in scene 1; "cars"/"cart" in
        // scene 3 are close but not perfect.
        assert_eq!(search_advanced(&store, "car", 100), vec![1]);
        assert!(search_advanced(&store, "bicycle", 100).is_empty());
    }

    #[test]
    fn test_results_follow_scene_order_not_score_order() {
        let mut store = CaptionStore::default();
        store.insert(1, "a carp".to_string());
        store.insert(2, "a car".to_string());
        // Scene 2 scores higher, but scene 1 still comes first.
        assert_eq!(search_advanced(&store, "car", 60), vec![1, 2]);
    }

    #[test]
    fn test_vocabulary_prefix_suggestions() {
        let store = sample_store();
        let vocab = CaptionVocabulary::from_store(&store);

        assert_eq!(vocab.suggest("car", 10), vec!["car", "cars", "cart"]);
        assert_eq!(vocab.suggest("gre", 10), vec!["green"]);
        assert!(vocab.suggest("zzz", 10).is_empty());
        assert_eq!(vocab.suggest("car", 2).len(), 2);
    }
}
