// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Prompt safety filter for image generation
//!
//! Pure and synchronous. Built-in rules run first, in order, then any custom
//! terms from configuration. The first match wins.
//!
//! Turkish `İ` and `ı` have no simple case fold to `i`, so both the text and
//! the patterns are folded to `i` before matching.

mod rules;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

pub use rules::BUILTIN_RULES;

/// Categories of unsafe content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCategory {
    Sexual,
    Violence,
    SelfHarm,
    Hate,
    Custom,
}

impl SafetyCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyCategory::Sexual => "sexual",
            SafetyCategory::Violence => "violence",
            SafetyCategory::SelfHarm => "self_harm",
            SafetyCategory::Hate => "hate",
            SafetyCategory::Custom => "custom",
        }
    }
}

impl fmt::Display for SafetyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    Safe,
    Unsafe {
        category: SafetyCategory,
        rule: String,
        reason: String,
    },
}

impl SafetyVerdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, SafetyVerdict::Safe)
    }
}

/// Extra filter settings loaded from configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Terms blocked in addition to the built-in rules, matched case-insensitively
    pub custom_blocked_terms: Vec<String>,
}

struct CompiledRule {
    id: String,
    category: SafetyCategory,
    pattern: Regex,
}

pub struct PromptSafetyFilter {
    rules: Vec<CompiledRule>,
}

impl PromptSafetyFilter {
    pub fn new(config: &SafetyConfig) -> Self {
        let mut rules: Vec<CompiledRule> = BUILTIN_RULES
            .iter()
            .filter_map(|&(pattern, category)| compile(pattern, category))
            .collect();

        for term in &config.custom_blocked_terms {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            if let Some(rule) = compile(&regex::escape(term), SafetyCategory::Custom) {
                rules.push(rule);
            }
        }

        Self { rules }
    }

    /// Check one piece of text. Empty text is always safe.
    pub fn check(&self, text: &str) -> SafetyVerdict {
        if text.trim().is_empty() {
            return SafetyVerdict::Safe;
        }
        let text = fold_turkish_i(text);
        for rule in &self.rules {
            if rule.pattern.is_match(&text) {
                return SafetyVerdict::Unsafe {
                    category: rule.category,
                    rule: rule.id.clone(),
                    reason: format!("{} ({})", rule.id, rule.category),
                };
            }
        }
        SafetyVerdict::Safe
    }

    /// Check the prompt, then the negative prompt if present
    pub fn check_prompt(&self, prompt: &str, negative_prompt: Option<&str>) -> SafetyVerdict {
        let verdict = self.check(prompt);
        if !verdict.is_safe() {
            return verdict;
        }
        negative_prompt
            .map(|negative| self.check(negative))
            .unwrap_or(SafetyVerdict::Safe)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for PromptSafetyFilter {
    fn default() -> Self {
        Self::new(&SafetyConfig::default())
    }
}

/// Check text against the built-in rules only
pub fn check(text: &str) -> SafetyVerdict {
    PromptSafetyFilter::default().check(text)
}

fn compile(pattern: &str, category: SafetyCategory) -> Option<CompiledRule> {
    match RegexBuilder::new(&fold_turkish_i(pattern))
        .case_insensitive(true)
        .build()
    {
        Ok(regex) => Some(CompiledRule {
            id: rule_id(pattern),
            category,
            pattern: regex,
        }),
        Err(e) => {
            tracing::warn!("Skipping invalid safety pattern {:?}: {}", pattern, e);
            None
        }
    }
}

fn fold_turkish_i(text: &str) -> Cow<'_, str> {
    if !text.contains(|c| matches!(c, 'İ' | 'ı')) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.chars()
            .map(|c| match c {
                'İ' | 'ı' => 'i',
                c => c,
            })
            .collect(),
    )
}

/// Stable identifier derived from the pattern source: its first literal word
fn rule_id(pattern: &str) -> String {
    let mut word = String::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            // escape sequences such as \b or \w are not part of the word
            chars.next();
            if !word.is_empty() {
                break;
            }
        } else if c.is_alphanumeric() {
            word.extend(c.to_lowercase());
        } else if !word.is_empty() {
            break;
        }
    }
    if word.is_empty() {
        word.push_str("rule");
    }
    format!("blocked:{}", word)
}
