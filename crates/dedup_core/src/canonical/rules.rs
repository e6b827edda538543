//! Role-specific rewrite tables for names, addresses and places.
//!
//! # Invariants
//! - Tables run in declaration order on already folded text.
//! - Name digraphs are rewritten in one left-to-right, non-overlapping pass,
//!   so a produced letter is never rewritten again.

use once_cell::sync::Lazy;
use regex::Regex;

/// Phonetic digraph rewrites for names.
const NAME_DIGRAPHS: &[(&str, &str)] = &[
    ("CH", "K"),
    ("PH", "F"),
    ("TH", "T"),
    ("CK", "K"),
    ("QU", "KW"),
];

/// Consonants whose doubled runs collapse in names. `Y` is treated as a vowel.
const COLLAPSIBLE_CONSONANTS: &str = "BCDFGHJKLMNPQRSTVWXZ";

const ADDRESS_RULES: &[(&str, &str)] = &[
    // Also matches compound suffixes such as `HAUPTSTR.`.
    (r"STR\b\.?", "STRASSE"),
    (r"\bPL\b\.?", "PLATZ"),
    (r"\bALLE\b", "ALLEE"),
    (r"\bNR\b\.?", ""),
    (r"\bNUMMER\b", ""),
];

const ADDRESS_ENHANCED_RULES: &[(&str, &str)] = &[(r"\bPOSTFACH\b", "PF"), (r"\bPF\b\.?", "PF")];

const CITY_RULES: &[(&str, &str)] = &[
    (r"\bSANKT\b", "ST"),
    (r"\bST\b\.?", "ST"),
    (r"\bBAD\b", "B"),
    (r"\bAM\b", "A"),
    (r"\bAN\b", "A"),
    (r"\bAUF\b", "A"),
    (r"\bIM\b", "I"),
    (r"\bINS\b", "I"),
    (r"\bBEI\b", "B"),
    (r"\bUNTER\b", "U"),
    (r"\bOBER\b", "O"),
    (r"\bNIEDER\b", "N"),
    (r"\bGROSS\b", "G"),
    (r"\bKLEIN\b", "K"),
];

static NAME_DIGRAPH_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = NAME_DIGRAPHS
        .iter()
        .map(|(from, _)| regex::escape(from))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&alternation).expect("valid name digraph regex")
});
static ADDRESS_RULES_RE: Lazy<Vec<(Regex, &'static str)>> =
    Lazy::new(|| compile_rules(ADDRESS_RULES));
static ADDRESS_ENHANCED_RULES_RE: Lazy<Vec<(Regex, &'static str)>> =
    Lazy::new(|| compile_rules(ADDRESS_ENHANCED_RULES));
static CITY_RULES_RE: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| compile_rules(CITY_RULES));

/// Applies digraph rewrites, then collapses doubled consonants.
pub fn apply_name_rules(folded: &str) -> String {
    let rewritten = NAME_DIGRAPH_RE.replace_all(folded, |caps: &regex::Captures<'_>| {
        let matched = caps.get(0).map_or("", |m| m.as_str());
        NAME_DIGRAPHS
            .iter()
            .find(|(from, _)| *from == matched)
            .map_or(matched, |(_, to)| *to)
            .to_string()
    });
    collapse_repeated_consonants(&rewritten)
}

/// Expands street abbreviations; `enhanced` adds post-box rewrites.
pub fn apply_address_rules(folded: &str, enhanced: bool) -> String {
    let expanded = apply_rules(folded, &ADDRESS_RULES_RE);
    if enhanced {
        apply_rules(&expanded, &ADDRESS_ENHANCED_RULES_RE)
    } else {
        expanded
    }
}

/// Contracts compound place-name particles.
pub fn apply_city_rules(folded: &str) -> String {
    apply_rules(folded, &CITY_RULES_RE)
}

fn apply_rules(value: &str, rules: &[(Regex, &'static str)]) -> String {
    rules
        .iter()
        .fold(value.to_string(), |acc, (pattern, replacement)| {
            pattern.replace_all(&acc, *replacement).into_owned()
        })
}

fn compile_rules(rules: &[(&'static str, &'static str)]) -> Vec<(Regex, &'static str)> {
    rules
        .iter()
        .map(|(pattern, replacement)| {
            (
                Regex::new(pattern).expect("valid canonicalization rule regex"),
                *replacement,
            )
        })
        .collect()
}

fn collapse_repeated_consonants(value: &str) -> String {
    let mut collapsed = String::with_capacity(value.len());
    let mut previous: Option<char> = None;
    for c in value.chars() {
        if previous == Some(c) && COLLAPSIBLE_CONSONANTS.contains(c) {
            continue;
        }
        collapsed.push(c);
        previous = Some(c);
    }
    collapsed
}
