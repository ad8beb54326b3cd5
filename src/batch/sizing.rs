//! Batch size selection by probing real prompts against a token ceiling.

use crate::config::BatchSettings;
use crate::graph::Record;

use super::prompt::batch_prompt;
use super::BatchOperation;

/// Inputs this small run as one batch without probing.
pub const MIN_PROBE_ITEMS: usize = 5;

/// Estimated token count: whitespace-separated words times a fixed ratio.
pub fn estimate_tokens(text: &str, tokens_per_word: f64) -> f64 {
    text.split_whitespace().count() as f64 * tokens_per_word
}

/// The chosen size and whether it came from probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeChoice {
    pub size: usize,
    pub probed: bool,
}

/// Pick the largest candidate whose prompt estimate stays under the ceiling.
///
/// Candidates are tried in increasing order and probing stops at the first
/// one that exceeds the ceiling, so the result is always a size that was
/// measured (or 1 when even the smallest candidate is too large).
pub fn choose_batch_size(
    items: &[Record],
    operation: BatchOperation,
    instruction: &str,
    settings: &BatchSettings,
) -> SizeChoice {
    if items.len() <= MIN_PROBE_ITEMS {
        return SizeChoice {
            size: items.len(),
            probed: false,
        };
    }

    let ceiling = settings.token_ceiling as f64;
    let mut chosen = None;
    for candidate in settings.sorted_candidates() {
        let sample = &items[..candidate.min(items.len())];
        let prompt = batch_prompt(operation, instruction, sample, settings);
        let estimate = estimate_tokens(&prompt, settings.tokens_per_word);
        tracing::debug!(stage = "batch", candidate, estimate, "probed batch size");
        if estimate < ceiling {
            chosen = Some(candidate);
        } else {
            break;
        }
    }

    SizeChoice {
        size: chosen.unwrap_or(1),
        probed: true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn items(n: usize, words_each: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                Record::from_iter([
                    ("id".to_string(), json!(format!("item-{i}"))),
                    ("description".to_string(), json!(vec!["word"; words_each].join(" "))),
                ])
            })
            .collect()
    }

    #[test]
    fn small_inputs_are_not_probed() {
        let choice = choose_batch_size(&items(5, 1000), BatchOperation::Transform, "x", &BatchSettings::default());
        assert_eq!(choice, SizeChoice { size: 5, probed: false });
        let choice = choose_batch_size(&[], BatchOperation::Transform, "x", &BatchSettings::default());
        assert_eq!(choice.size, 0);
    }

    #[test]
    fn short_items_take_largest_candidate() {
        let choice = choose_batch_size(&items(200, 3), BatchOperation::Classify, "x", &BatchSettings::default());
        assert_eq!(choice, SizeChoice { size: 50, probed: true });
    }

    #[test]
    fn stops_at_first_candidate_over_ceiling() {
        // ~155 words per listed item: 10 items fit under 3000 tokens, 20 do not.
        let choice = choose_batch_size(&items(100, 150), BatchOperation::Transform, "x", &BatchSettings::default());
        assert_eq!(choice.size, 10);
    }

    #[test]
    fn falls_back_to_one_when_smallest_is_too_large() {
        let choice = choose_batch_size(&items(10, 1000), BatchOperation::Transform, "x", &BatchSettings::default());
        assert_eq!(choice, SizeChoice { size: 1, probed: true });
    }

    #[test]
    fn only_measured_sizes_are_chosen() {
        let settings = BatchSettings {
            candidate_sizes: vec![7, 3],
            ..BatchSettings::default()
        };
        let choice = choose_batch_size(&items(30, 2), BatchOperation::Count, "x", &settings);
        assert!(settings.candidate_sizes.contains(&choice.size));
        assert_eq!(choice.size, 7);
    }

    #[test]
    fn estimate_counts_words() {
        assert!((estimate_tokens("a b  c\nd", 1.3) - 5.2).abs() < 1e-9);
    }
}
