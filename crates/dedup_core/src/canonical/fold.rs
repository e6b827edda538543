//! Basic fold and final key-stripping passes shared by all text roles.

/// Fixed substitution table applied after uppercasing.
const DIACRITIC_FOLDS: &[(char, &str)] = &[
    ('Ä', "AE"),
    ('Ö', "OE"),
    ('Ü', "UE"),
    ('ẞ', "SS"),
    ('ß', "SS"),
    ('Æ', "AE"),
    ('Œ', "OE"),
    ('Ø', "OE"),
    ('À', "A"),
    ('Á', "A"),
    ('Â', "A"),
    ('Ã', "A"),
    ('Å', "A"),
    ('Ą', "A"),
    ('Ā', "A"),
    ('Ă', "A"),
    ('Ç', "C"),
    ('Ğ', "G"),
    ('Ġ', "G"),
    ('Ģ', "G"),
    ('Ħ', "H"),
    ('Č', "C"),
    ('Ć', "C"),
    ('Ċ', "C"),
    ('Ĉ', "C"),
    ('Đ', "D"),
    ('Ď', "D"),
    ('Ð', "D"),
    ('È', "E"),
    ('É', "E"),
    ('Ê', "E"),
    ('Ë', "E"),
    ('Ě', "E"),
    ('Ę', "E"),
    ('Ē', "E"),
    ('Ė', "E"),
    ('Ì', "I"),
    ('İ', "I"),
    ('Ī', "I"),
    ('Į', "I"),
    ('Í', "I"),
    ('Î', "I"),
    ('Ï', "I"),
    ('Ķ', "K"),
    ('Ł', "L"),
    ('Ľ', "L"),
    ('Ĺ', "L"),
    ('Ļ', "L"),
    ('Ñ', "N"),
    ('Ń', "N"),
    ('Ň', "N"),
    ('Ņ', "N"),
    ('Ò', "O"),
    ('Ó', "O"),
    ('Ô', "O"),
    ('Õ', "O"),
    ('Ő', "O"),
    ('Ō', "O"),
    ('Ř', "R"),
    ('Ŕ', "R"),
    ('Ŗ', "R"),
    ('Š', "S"),
    ('Ś', "S"),
    ('Ş', "S"),
    ('Ș', "S"),
    ('Ť', "T"),
    ('Ţ', "T"),
    ('Ț', "T"),
    ('Þ', "TH"),
    ('Ù', "U"),
    ('Ú', "U"),
    ('Û', "U"),
    ('Ů', "U"),
    ('Ű', "U"),
    ('Ū', "U"),
    ('Ų', "U"),
    ('Ý', "Y"),
    ('Ÿ', "Y"),
    ('Ž', "Z"),
    ('Ź', "Z"),
    ('Ż', "Z"),
];

const COMBINING_DIAERESIS: char = '\u{0308}';

/// Uppercases, trims, collapses whitespace runs and folds diacritics.
///
/// A decomposed diaeresis after `A`, `O` or `U` folds like the precomposed
/// umlaut; every other combining mark is dropped.
pub fn fold_basic(value: &str) -> String {
    let upper = value.to_uppercase();
    let mut folded = String::with_capacity(upper.len());
    let mut pending_space = false;

    for c in upper.chars() {
        if c.is_whitespace() {
            pending_space = !folded.is_empty();
            continue;
        }
        if is_combining_mark(c) {
            if c == COMBINING_DIAERESIS && matches!(folded.chars().last(), Some('A' | 'O' | 'U')) {
                folded.push('E');
            }
            continue;
        }
        if pending_space {
            folded.push(' ');
            pending_space = false;
        }
        match fold_char(c) {
            Some(replacement) => folded.push_str(replacement),
            None => folded.push(c),
        }
    }

    folded
}

/// Final pass for text roles: keeps `A-Z` and `0-9` only.
///
/// Letters outside the fold table, such as Cyrillic or Greek, are dropped.
pub fn strip_to_key(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

/// Final pass for dates: removes whitespace, keeps separators.
pub fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

fn fold_char(c: char) -> Option<&'static str> {
    DIACRITIC_FOLDS
        .iter()
        .find(|(from, _)| *from == c)
        .map(|(_, to)| *to)
}

fn is_combining_mark(c: char) -> bool {
    ('\u{0300}'..='\u{036F}').contains(&c)
}
