//! Deterministic canonicalization of raw identity fields.
//!
//! # Responsibility
//! - Turn one raw value plus its field role into a comparison key.
//! - Report malformed input and degraded enhanced mode without failing.
//!
//! # Invariants
//! - Canonicalization is total: every input yields a key.
//! - Output depends only on role, raw value, mode and the provider selected at
//!   construction; repeated calls return identical strings.
//! - Step order is fixed: basic fold, role rules, final strip, then enhanced
//!   steps that operate on the stripped key. Dates skip fold and strip.

pub mod date;
pub mod fold;
pub mod phonetic;
pub mod rules;

use crate::canonical::fold::{fold_basic, strip_to_key, strip_whitespace};
use crate::canonical::phonetic::{select_phonetic_provider, PhoneticProvider};
use log::warn;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Minimum Jaro-Winkler similarity (exclusive) for snapping to a known place.
pub const PLACE_SNAP_THRESHOLD: f64 = 0.85;

/// Built-in reference places, already in key form.
pub const DEFAULT_REFERENCE_PLACES: &[&str] = &[
    "BERLIN",
    "BREMEN",
    "DORTMUND",
    "DRESDEN",
    "DUESSELDORF",
    "DUISBURG",
    "ESSEN",
    "FRANKFURT",
    "HAMBURG",
    "HANNOVER",
    "KOELN",
    "LEIPZIG",
    "MUENCHEN",
    "NUERNBERG",
    "STUTTGART",
];

/// Semantic role of a source field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    /// Person or company name parts.
    Name,
    /// Street line including house number.
    Address,
    /// Place name.
    City,
    /// Calendar date such as a birth date.
    Date,
    /// Anything else: postal code, country, gender.
    Other,
}

impl FieldRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Address => "address",
            Self::City => "city",
            Self::Date => "date",
            Self::Other => "other",
        }
    }

    /// Default comparison key name for this role, e.g. `name_key`.
    pub fn default_key(self) -> String {
        format!("{}_key", self.as_str())
    }

    fn uses_phonetics(self) -> bool {
        matches!(self, Self::Name | Self::City)
    }
}

/// Normalization strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    /// Rule tables only.
    #[default]
    Standard,
    /// Rule tables plus phonetic suffixes, place snapping and post-box rules.
    Enhanced,
}

impl NormalizationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Enhanced => "enhanced",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "enhanced" => Some(Self::Enhanced),
            _ => None,
        }
    }
}

/// Recoverable per-field condition found during canonicalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Value could not be interpreted for its role; a pass-through key was used.
    Malformed,
    /// Enhanced step skipped because phonetic support is unavailable.
    Degraded,
}

/// Canonical key plus an optional issue flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalField {
    pub value: String,
    pub issue: Option<IssueKind>,
}

impl CanonicalField {
    fn clean(value: String) -> Self {
        Self { value, issue: None }
    }
}

/// Field canonicalizer bound to one phonetic provider.
pub struct Canonicalizer {
    phonetics: Box<dyn PhoneticProvider>,
    reference_places: Vec<String>,
    degraded_warning: OnceCell<()>,
}

impl Canonicalizer {
    /// Creates a canonicalizer with the built-in reference place list.
    pub fn new(phonetics: Box<dyn PhoneticProvider>) -> Self {
        Self {
            phonetics,
            reference_places: DEFAULT_REFERENCE_PLACES
                .iter()
                .map(|place| (*place).to_string())
                .collect(),
            degraded_warning: OnceCell::new(),
        }
    }

    /// Creates a canonicalizer with the best provider compiled into this build.
    pub fn with_default_phonetics() -> Self {
        Self::new(select_phonetic_provider(true))
    }

    /// Replaces the reference place list.
    ///
    /// Entries are folded to key form, deduplicated and sorted so snapping
    /// ties resolve to the lexicographically first place.
    pub fn with_reference_places<I, S>(mut self, places: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys = places
            .into_iter()
            .map(|place| strip_to_key(&fold_basic(place.as_ref())))
            .filter(|key| !key.is_empty())
            .collect::<Vec<_>>();
        keys.sort();
        keys.dedup();
        self.reference_places = keys;
        self
    }

    pub fn phonetics_available(&self) -> bool {
        self.phonetics.is_available()
    }

    pub fn provider_id(&self) -> &'static str {
        self.phonetics.provider_id()
    }

    /// Returns the canonical key for `raw_value`.
    pub fn canonicalize(&self, role: FieldRole, raw_value: &str, mode: NormalizationMode) -> String {
        self.canonicalize_field(role, raw_value, mode).value
    }

    /// Returns the canonical key and any recoverable issue.
    pub fn canonicalize_field(
        &self,
        role: FieldRole,
        raw_value: &str,
        mode: NormalizationMode,
    ) -> CanonicalField {
        let trimmed = raw_value.trim();
        if trimmed.is_empty() {
            return CanonicalField::clean(String::new());
        }

        if role == FieldRole::Date {
            return match date::canonicalize_date(trimmed) {
                Some(iso) => CanonicalField::clean(iso),
                None => CanonicalField {
                    value: strip_whitespace(&trimmed.to_uppercase()),
                    issue: Some(IssueKind::Malformed),
                },
            };
        }

        let enhanced = mode == NormalizationMode::Enhanced;
        let folded = fold_basic(trimmed);
        let shaped = match role {
            FieldRole::Name => rules::apply_name_rules(&folded),
            FieldRole::Address => rules::apply_address_rules(&folded, enhanced),
            FieldRole::City => rules::apply_city_rules(&folded),
            FieldRole::Date | FieldRole::Other => folded,
        };
        let key = strip_to_key(&shaped);

        if !enhanced || !role.uses_phonetics() || key.is_empty() {
            return CanonicalField::clean(key);
        }

        if !self.phonetics.is_available() {
            self.warn_degraded_once();
            return CanonicalField {
                value: key,
                issue: Some(IssueKind::Degraded),
            };
        }

        let value = match role {
            FieldRole::Name => self.append_phonetic_code(key),
            FieldRole::City => self.snap_to_reference_place(key),
            _ => key,
        };
        CanonicalField::clean(value)
    }

    fn append_phonetic_code(&self, key: String) -> String {
        match self.phonetics.encode(&key) {
            Some(code) => format!("{key}{code}"),
            None => key,
        }
    }

    fn snap_to_reference_place(&self, key: String) -> String {
        let mut best: Option<(&str, f64)> = None;
        for place in &self.reference_places {
            let Some(score) = self.phonetics.similarity(&key, place) else {
                continue;
            };
            if score <= PLACE_SNAP_THRESHOLD {
                continue;
            }
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((place.as_str(), score));
            }
        }
        best.map_or(key, |(place, _)| place.to_string())
    }

    fn warn_degraded_once(&self) {
        if self.degraded_warning.set(()).is_ok() {
            warn!(
                "event=phonetics_degraded module=canonical status=degraded provider={} fallback=standard",
                self.phonetics.provider_id()
            );
        }
    }
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::with_default_phonetics()
    }
}
