// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Prompt safety filter

use fabstir_image_pipeline::safety::{
    self, PromptSafetyFilter, SafetyCategory, SafetyConfig, SafetyVerdict,
};

#[test]
fn test_blocks_builtin_terms() {
    for prompt in ["nsfw", "porno", "şiddet", "an NSFW poster", "scene of graphic violence"] {
        assert!(!safety::check(prompt).is_safe(), "expected {:?} to be blocked", prompt);
    }
}

#[test]
fn test_accepts_ordinary_prompts() {
    for prompt in [
        "a watercolor mountain landscape",
        "minimalist wedding invitation with olive branches",
        "kırmızı bir bisiklet, sulu boya",
    ] {
        assert_eq!(safety::check(prompt), SafetyVerdict::Safe, "{:?}", prompt);
    }
}

#[test]
fn test_verdict_names_rule_and_category() {
    match safety::check("Some NSFW art") {
        SafetyVerdict::Unsafe {
            category,
            rule,
            reason,
        } => {
            assert_eq!(category, SafetyCategory::Sexual);
            assert_eq!(rule, "blocked:nsfw");
            assert_eq!(reason, "blocked:nsfw (sexual)");
        }
        SafetyVerdict::Safe => panic!("expected the prompt to be blocked"),
    }
}

#[test]
fn test_turkish_rules() {
    let verdict = safety::check("karanlık bir katliam sahnesi");
    assert!(matches!(
        verdict,
        SafetyVerdict::Unsafe {
            category: SafetyCategory::Violence,
            ..
        }
    ));
    assert!(!safety::check("intihar notu").is_safe());
}

#[test]
fn test_turkish_capitals_are_blocked() {
    for prompt in ["ŞİDDET", "IRKÇI SLOGAN", "SOYKIRIM", "İNTİHAR", "Çıplak"] {
        assert!(!safety::check(prompt).is_safe(), "expected {:?} to be blocked", prompt);
    }
    match safety::check("IRKÇI") {
        SafetyVerdict::Unsafe { rule, category, .. } => {
            assert_eq!(rule, "blocked:ırkçı");
            assert_eq!(category, SafetyCategory::Hate);
        }
        SafetyVerdict::Safe => panic!("expected the prompt to be blocked"),
    }
}

#[test]
fn test_nazi_rule_spares_nazik() {
    assert!(safety::check("nazik bir kedi portresi").is_safe());
    assert!(safety::check("Nazik ve zarif bir davetiye").is_safe());
    for prompt in ["nazi flag", "Nazis marching", "nazism poster", "a nazist rally"] {
        assert!(!safety::check(prompt).is_safe(), "expected {:?} to be blocked", prompt);
    }
}

#[test]
fn test_negative_prompt_is_checked() {
    let filter = PromptSafetyFilter::default();
    assert!(filter.check_prompt("a quiet harbor", Some("blurry")).is_safe());
    assert!(!filter.check_prompt("a quiet harbor", Some("nsfw")).is_safe());
}

#[test]
fn test_custom_terms_extend_builtin_rules() {
    let filter = PromptSafetyFilter::new(&SafetyConfig {
        custom_blocked_terms: vec!["Clown".to_string(), "  ".to_string()],
    });
    match filter.check("a scary clown at a birthday party") {
        SafetyVerdict::Unsafe { category, rule, .. } => {
            assert_eq!(category, SafetyCategory::Custom);
            assert_eq!(rule, "blocked:clown");
        }
        SafetyVerdict::Safe => panic!("custom term not applied"),
    }
    assert!(filter.check("a birthday party").is_safe());
}

#[test]
fn test_empty_text_is_safe() {
    assert!(safety::check("").is_safe());
    assert!(safety::check("   ").is_safe());
}
