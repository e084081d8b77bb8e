//! ISBN normalization and conversion.

/// Strips hyphens and whitespace and upper-cases a trailing `x`, then checks the
/// result is 10-13 ASCII digits (a 10-character form may end in `X`).
///
/// No checksum validation is done: dumps carry plenty of ISBNs with bad check
/// digits that still match the primary store byte for byte.
pub fn normalize_isbn(raw: &str) -> Option<String> {
    let mut cleaned: String = raw
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .collect();
    if cleaned.ends_with('x') {
        cleaned.pop();
        cleaned.push('X');
    }

    let len = cleaned.len();
    if !(10..=13).contains(&len) {
        return None;
    }

    let bytes = cleaned.as_bytes();
    let (body, last) = bytes.split_at(len - 1);
    let body_ok = body.iter().all(u8::is_ascii_digit);
    let last_ok = last[0].is_ascii_digit() || (len == 10 && last[0] == b'X');
    (body_ok && last_ok).then_some(cleaned)
}

/// Extracts an identifier from a `source_records` entry such as `amazon:0123456789`.
///
/// The part after the last colon is kept when it normalizes to a valid ISBN.
pub fn identifier_from_source_record(entry: &str) -> Option<String> {
    let (_, token) = entry.rsplit_once(':')?;
    normalize_isbn(token)
}

/// Converts a normalized ISBN-10 into its 978-prefixed ISBN-13 form.
pub fn isbn10_to_13(isbn10: &str) -> Option<String> {
    if isbn10.len() != 10 {
        return None;
    }
    let core = &isbn10[..9];
    if !core.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let prefix = format!("978{}", core);
    let check = isbn13_check_digit(&prefix)?;
    Some(format!("{}{}", prefix, check))
}

/// Converts a normalized 978-prefixed ISBN-13 into ISBN-10. 979 ISBNs have no ISBN-10 form.
pub fn isbn13_to_10(isbn13: &str) -> Option<String> {
    if isbn13.len() != 13 || !isbn13.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let core = isbn13.strip_prefix("978")?;
    let core = &core[..9];
    let sum: u32 = core
        .bytes()
        .enumerate()
        .map(|(i, b)| (10 - i as u32) * (b - b'0') as u32)
        .sum();
    let check = (11 - sum % 11) % 11;
    let check = if check == 10 {
        'X'
    } else {
        char::from(b'0' + check as u8)
    };
    Some(format!("{}{}", core, check))
}

/// The other length's form of `isbn`, used as a fallback lookup key.
pub fn alternate_form(isbn: &str) -> Option<String> {
    match isbn.len() {
        10 => isbn10_to_13(isbn),
        13 => isbn13_to_10(isbn),
        _ => None,
    }
}

fn isbn13_check_digit(first12: &str) -> Option<char> {
    if first12.len() != 12 {
        return None;
    }
    let sum: u32 = first12
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            let digit = (b - b'0') as u32;
            if i % 2 == 0 {
                digit
            } else {
                digit * 3
            }
        })
        .sum();
    let check = (10 - sum % 10) % 10;
    Some(char::from(b'0' + check as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_and_uppercases() {
        assert_eq!(
            normalize_isbn(" 0-306-40615-2 "),
            Some("0306406152".to_string())
        );
        assert_eq!(normalize_isbn("080442957x"), Some("080442957X".to_string()));
        assert_eq!(
            normalize_isbn("978-0-00-000000-1"),
            Some("9780000000001".to_string())
        );
    }

    #[test]
    fn test_normalize_rejects_invalid() {
        assert_eq!(normalize_isbn("12345"), None);
        assert_eq!(normalize_isbn("12345678901234"), None);
        assert_eq!(normalize_isbn("97800000000X1"), None);
        // X only allowed as the tenth character of an ISBN-10
        assert_eq!(normalize_isbn("123456789012X"), None);
        assert_eq!(normalize_isbn("abcdefghij"), None);
    }

    #[test]
    fn test_source_record_token() {
        assert_eq!(
            identifier_from_source_record("amazon:0123456789"),
            Some("0123456789".to_string())
        );
        assert_eq!(
            identifier_from_source_record("ia:foo:9780000000001"),
            Some("9780000000001".to_string())
        );
        assert_eq!(identifier_from_source_record("marc:some_file.mrc"), None);
        assert_eq!(identifier_from_source_record("0123456789"), None);
    }

    #[test]
    fn test_isbn_conversions() {
        assert_eq!(isbn10_to_13("0306406152"), Some("9780306406157".to_string()));
        assert_eq!(isbn13_to_10("9780306406157"), Some("0306406152".to_string()));
        assert_eq!(isbn13_to_10("9780804429573"), Some("080442957X".to_string()));
        assert_eq!(isbn13_to_10("9791234567896"), None);
    }

    #[test]
    fn test_alternate_form() {
        assert_eq!(
            alternate_form("080442957X"),
            Some("9780804429573".to_string())
        );
        assert_eq!(alternate_form("97803064061"), None);
    }
}
