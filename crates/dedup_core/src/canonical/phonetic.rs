//! Phonetic/fuzzy capability used by enhanced normalization.
//!
//! # Responsibility
//! - Hide whether phonetic support is compiled in behind one trait.
//! - Provide the Soundex encoder and Jaro-Winkler similarity.
//!
//! # Invariants
//! - Providers never fail; unavailable capability is reported by
//!   `is_available() == false` and `None` results.

/// Capability-checked phonetic strategy selected once at startup.
pub trait PhoneticProvider: Send + Sync {
    /// Stable provider id for logs.
    fn provider_id(&self) -> &'static str;

    /// Whether encode/similarity produce results.
    fn is_available(&self) -> bool;

    /// Phonetic code for `value`, or `None` when nothing can be encoded.
    fn encode(&self, value: &str) -> Option<String>;

    /// Similarity in `[0, 1]`.
    fn similarity(&self, left: &str, right: &str) -> Option<f64>;
}

/// Fallback used when phonetic support is not compiled in or disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailablePhonetics;

impl PhoneticProvider for UnavailablePhonetics {
    fn provider_id(&self) -> &'static str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn encode(&self, _value: &str) -> Option<String> {
        None
    }

    fn similarity(&self, _left: &str, _right: &str) -> Option<f64> {
        None
    }
}

/// Soundex codes plus Jaro-Winkler similarity.
#[cfg(feature = "phonetic")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SoundexProvider;

#[cfg(feature = "phonetic")]
impl PhoneticProvider for SoundexProvider {
    fn provider_id(&self) -> &'static str {
        "soundex"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn encode(&self, value: &str) -> Option<String> {
        soundex(value)
    }

    fn similarity(&self, left: &str, right: &str) -> Option<f64> {
        Some(strsim::jaro_winkler(left, right))
    }
}

/// Returns the best provider compiled into this build.
///
/// `enabled = false` selects the fallback regardless of build features.
pub fn select_phonetic_provider(enabled: bool) -> Box<dyn PhoneticProvider> {
    if !enabled {
        return Box::new(UnavailablePhonetics);
    }

    #[cfg(feature = "phonetic")]
    {
        Box::new(SoundexProvider)
    }
    #[cfg(not(feature = "phonetic"))]
    {
        Box::new(UnavailablePhonetics)
    }
}

/// American Soundex over the ASCII letters of `value`.
///
/// `H` and `W` do not separate equal codes; vowels do.
pub fn soundex(value: &str) -> Option<String> {
    let mut letters = value
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_uppercase());
    let first = letters.next()?;

    let mut code = String::with_capacity(4);
    code.push(first);
    let mut last_digit = soundex_digit(first);

    for c in letters {
        if code.len() == 4 {
            break;
        }
        match soundex_digit(c) {
            Some(digit) => {
                if last_digit != Some(digit) {
                    code.push(digit);
                }
                last_digit = Some(digit);
            }
            None if c == 'H' || c == 'W' => {}
            None => last_digit = None,
        }
    }

    while code.len() < 4 {
        code.push('0');
    }
    Some(code)
}

fn soundex_digit(c: char) -> Option<char> {
    match c {
        'B' | 'F' | 'P' | 'V' => Some('1'),
        'C' | 'G' | 'J' | 'K' | 'Q' | 'S' | 'X' | 'Z' => Some('2'),
        'D' | 'T' => Some('3'),
        'L' => Some('4'),
        'M' | 'N' => Some('5'),
        'R' => Some('6'),
        _ => None,
    }
}
