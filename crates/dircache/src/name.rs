//! Case-insensitive file name matching
//!
//! Names compare the way the Windows object manager does for lookups:
//! ignoring case. Pure ASCII names take a byte-wise fast path; anything else
//! is upper-cased one character at a time. A character whose upper case
//! form is more than one character (`ß` -> `SS`) is left as is, so two names
//! only match when they have the same number of characters.

use std::borrow::Cow;
use xxhash_rust::xxh3::xxh3_64;

/// Compare two names ignoring case
pub fn names_equal(a: &str, b: &str) -> bool {
    if a.is_ascii() && b.is_ascii() {
        return a.eq_ignore_ascii_case(b);
    }

    let mut lhs = a.chars().map(fold_char);
    let mut rhs = b.chars().map(fold_char);
    loop {
        match (lhs.next(), rhs.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if x == y => {}
            _ => return false,
        }
    }
}

/// Upper case of a single character, or the character itself when its
/// upper case does not fit in one
fn fold_char(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

/// Case-folded form of a name, borrowed when no folding is needed
pub fn fold_name(name: &str) -> Cow<'_, str> {
    if name.is_ascii() {
        if name.bytes().any(|b| b.is_ascii_lowercase()) {
            Cow::Owned(name.to_ascii_uppercase())
        } else {
            Cow::Borrowed(name)
        }
    } else {
        Cow::Owned(name.chars().map(fold_char).collect())
    }
}

/// Hash of the case-folded name, used by the large directory index
pub fn name_hash(name: &str) -> u64 {
    xxh3_64(fold_name(name).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_fast_path() {
        assert!(names_equal("Bar.TXT", "bar.txt"));
        assert!(names_equal("", ""));
        assert!(!names_equal("bar.txt", "bar.txt2"));
        assert!(!names_equal("a", "b"));
    }

    #[test]
    fn test_non_ascii() {
        assert!(names_equal("Überfluß.h", "üBERFLUß.H"));
        assert!(names_equal("Ärger", "äRGER"));
        assert!(!names_equal("straße.h", "STRASSE.h"));
        assert!(!names_equal("Überfluß.h", "üBERFLUSS.H"));
        assert!(!names_equal("Ärger", "Arger"));
    }

    #[test]
    fn test_fold_and_hash_agree_with_equality() {
        assert_eq!(fold_name("FOO"), Cow::Borrowed("FOO"));
        assert_eq!(fold_name("foo"), "FOO");
        assert_eq!(fold_name("Straße"), "STRAßE");
        assert_eq!(name_hash("Straße"), name_hash("STRAßE"));
        assert_ne!(name_hash("Straße"), name_hash("STRASSE"));
        assert_eq!(name_hash("main.c"), name_hash("MAIN.C"));
        assert_ne!(name_hash("main.c"), name_hash("main.h"));
    }
}
