//! Rule-based shortening that needs no external service.

use async_trait::async_trait;

use crate::{Result, RewriteRequest, TextRewriter};

/// Largest fraction of the text the rewriter will remove.
pub const MAX_REDUCTION: f64 = 0.6;

const FILLERS: &[&str] = &[
    // en
    "very", "really", "quite", "just", "actually", "basically", "literally", "obviously",
    "certainly", "exactly", "totally", "completely", "absolutely", "definitely", "probably",
    "perhaps", "maybe",
    // es
    "muy", "realmente", "exactamente", "totalmente", "completamente", "absolutamente",
    "definitivamente", "probablemente", "quizás",
    // fr
    "très", "vraiment", "exactement", "totalement", "complètement", "absolument",
    "définitivement", "probablement", "peut-être",
];

fn is_filler(word: &str) -> bool {
    let bare: String = word
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .flat_map(char::to_lowercase)
        .collect();
    FILLERS.contains(&bare.as_str())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Shortens text in escalating steps, stopping as soon as it fits:
/// clause punctuation and whitespace, filler words, whole sentences, words.
///
/// Lengthening is not attempted; such requests return the input unchanged.
#[derive(Debug, Default, Clone)]
pub struct HeuristicRewriter;

impl HeuristicRewriter {
    pub fn shorten(&self, text: &str, target_length_factor: f64) -> String {
        let reduction = (1.0 - target_length_factor).min(MAX_REDUCTION);
        if reduction <= 0.0 {
            return text.to_string();
        }
        let original_len = char_len(text);
        let target_len = (original_len as f64 * (1.0 - reduction)) as usize;
        if target_len >= original_len {
            return text.to_string();
        }

        let cleaned: String = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .filter(|c| !matches!(c, ',' | '，' | ';' | '；' | ':' | '：'))
            .collect();
        if char_len(&cleaned) <= target_len {
            return cleaned;
        }

        let unfilled = cleaned
            .split_whitespace()
            .filter(|w| !is_filler(w))
            .collect::<Vec<_>>()
            .join(" ");
        if char_len(&unfilled) <= target_len {
            return non_empty(unfilled, &cleaned);
        }

        // Whole sentences from the front.
        let mut result = String::new();
        for sentence in unfilled.split_inclusive(['.', '!', '?', '。', '！', '？']) {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }
            let joined = if result.is_empty() {
                sentence.to_string()
            } else {
                format!("{result} {sentence}")
            };
            if char_len(&joined) > target_len {
                break;
            }
            result = joined;
        }
        if !result.is_empty() {
            return result;
        }

        // No full sentence fits: cut at words, or characters for unspaced scripts.
        let words: Vec<&str> = unfilled.split_whitespace().collect();
        let cut = if words.len() > 1 {
            let mut kept = words.len();
            while kept > 1 && char_len(&words[..kept].join(" ")) > target_len {
                kept -= 1;
            }
            words[..kept].join(" ")
        } else {
            unfilled.chars().take(target_len.max(1)).collect()
        };
        non_empty(cut, &cleaned)
    }
}

fn non_empty(candidate: String, cleaned: &str) -> String {
    if !candidate.trim().is_empty() {
        return candidate;
    }
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    words[..(words.len() / 3).max(1).min(words.len())].join(" ")
}

#[async_trait]
impl TextRewriter for HeuristicRewriter {
    async fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<String> {
        let shortened = self.shorten(request.text, request.target_length_factor);
        tracing::debug!(
            from = char_len(request.text),
            to = char_len(&shortened),
            factor = request.target_length_factor,
            "heuristic_rewrite"
        );
        Ok(shortened)
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}
