//! Sheet title matching that ignores case and Cyrillic look-alike letters.
//!
//! Sheet titles typed in mixed keyboard layouts often contain a Cyrillic `с`
//! or `а` where a Latin letter was meant; both forms compare equal here.

/// Maps lowercase Cyrillic letters to the Latin letter they render like.
/// Callers lowercase first, so both cases of a letter fold the same way.
fn fold_homoglyph(c: char) -> char {
    match c {
        'а' => 'a',
        'в' => 'b',
        'с' => 'c',
        'е' => 'e',
        'н' => 'h',
        'і' => 'i',
        'ј' => 'j',
        'к' => 'k',
        'м' => 'm',
        'о' => 'o',
        'р' => 'p',
        'ѕ' => 's',
        'т' => 't',
        'х' => 'x',
        'у' => 'y',
        other => other,
    }
}

/// Canonical form used for comparisons.
pub fn fold_title(title: &str) -> String {
    title
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(fold_homoglyph)
        .collect()
}

pub fn titles_match(left: &str, right: &str) -> bool {
    fold_title(left) == fold_title(right)
}

pub fn title_contains(title: &str, fragment: &str) -> bool {
    fold_title(title).contains(&fold_title(fragment))
}
