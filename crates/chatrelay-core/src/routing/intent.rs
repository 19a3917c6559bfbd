//! Keyword heuristics for guessing what a prompt is about

use crate::providers::Intent;

const CODE_HINTS: &[&str] = &[
    "```", "code", "function", "compile", "bug", "stack trace", "regex", "sql", "python",
    "rust", "javascript", "typescript", "refactor", "script",
];
const TRANSLATE_HINTS: &[&str] = &[
    "translate", "translation", "in english", "in french", "in spanish", "in german",
];
const SUMMARIZE_HINTS: &[&str] = &[
    "summarize", "summarise", "summary", "tl;dr", "tldr", "key points",
];
const REASONING_HINTS: &[&str] = &[
    "prove", "step by step", "calculate", "solve", "why does", "explain why", "math",
    "equation", "logic",
];
const CREATIVE_HINTS: &[&str] = &[
    "poem", "story", "lyrics", "haiku", "brainstorm", "slogan", "joke",
];

/// Guess the intent of a request.
///
/// Images always mean [`Intent::Vision`]. Otherwise the first matching group
/// wins, in the order code, translate, summarize, reasoning, creative.
pub fn infer_intent(prompt: &str, has_images: bool) -> Intent {
    if has_images {
        return Intent::Vision;
    }

    let lower = prompt.to_lowercase();
    let matches = |hints: &[&str]| hints.iter().any(|hint| lower.contains(hint));

    if matches(CODE_HINTS) {
        Intent::Code
    } else if matches(TRANSLATE_HINTS) {
        Intent::Translate
    } else if matches(SUMMARIZE_HINTS) {
        Intent::Summarize
    } else if matches(REASONING_HINTS) {
        Intent::Reasoning
    } else if matches(CREATIVE_HINTS) {
        Intent::Creative
    } else {
        Intent::Chat
    }
}
