// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Built-in blocklist (English and Turkish). Patterns are compiled case-insensitively.

use super::SafetyCategory;

pub const BUILTIN_RULES: &[(&str, SafetyCategory)] = &[
    // sexual
    (r"\bnsfw\b", SafetyCategory::Sexual),
    (r"\bporn\w*", SafetyCategory::Sexual),
    (r"\bnud(?:e|es|ity)\b", SafetyCategory::Sexual),
    (r"\bnaked\b", SafetyCategory::Sexual),
    (r"\bexplicit\s+sex\w*", SafetyCategory::Sexual),
    (r"\bhentai\b", SafetyCategory::Sexual),
    (r"\bçıplak\w*", SafetyCategory::Sexual),
    (r"\bmüstehcen\w*", SafetyCategory::Sexual),
    (r"\berotik\w*", SafetyCategory::Sexual),
    // violence
    (r"\bgore\b", SafetyCategory::Violence),
    (r"\bbehead\w*", SafetyCategory::Violence),
    (r"\bdismember\w*", SafetyCategory::Violence),
    (r"\bmassacre\w*", SafetyCategory::Violence),
    (r"\bgraphic\s+violence\b", SafetyCategory::Violence),
    (r"\bşiddet\w*", SafetyCategory::Violence),
    (r"\bkatliam\w*", SafetyCategory::Violence),
    (r"\bvahşet\w*", SafetyCategory::Violence),
    (r"\bkan\s+gölü", SafetyCategory::Violence),
    // self-harm
    (r"\bsuicid\w*", SafetyCategory::SelfHarm),
    (r"\bself[-\s]?harm\w*", SafetyCategory::SelfHarm),
    (r"\bintihar\w*", SafetyCategory::SelfHarm),
    (r"\bkendine\s+zarar", SafetyCategory::SelfHarm),
    // hate
    (r"\bnazi(?:s|sm|st)?\b", SafetyCategory::Hate),
    (r"\bwhite\s+power\b", SafetyCategory::Hate),
    (r"\bethnic\s+cleansing\b", SafetyCategory::Hate),
    (r"\bırkçı\w*", SafetyCategory::Hate),
    (r"\bsoykırım\w*", SafetyCategory::Hate),
];
