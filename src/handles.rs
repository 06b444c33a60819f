//! Contact handle canonicalization
//!
//! The same human contact shows up in the source data in inconsistent
//! formats: `+15551234567` in one table, `5551234567` in another, emails in
//! mixed case. Canonicalization reduces those to one comparable form, and
//! [`lookup_variants`] produces the ordered list of forms name-resolution
//! should try before giving up.
//!
//! These functions are total: null-ish input yields empty output, never an
//! error.

/// Canonicalize a raw handle string.
///
/// Emails are lowercased and trimmed. Phone numbers are reduced to digits
/// only, with a leading `1` stripped when 11 or more digits remain, which
/// folds US country-code variance; ten digits or fewer are kept whole.
#[must_use]
pub fn normalize_handle(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains('@') {
        return trimmed.to_lowercase();
    }

    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.len() >= 11 {
        if let Some(rest) = digits.strip_prefix('1') {
            return rest.to_string();
        }
    }
    digits
}

/// Ordered, de-duplicated lookup forms for a raw handle.
///
/// Order matters: the raw string as stored, then the normalized form, then
/// a `+1`-prefixed form for 10-digit numbers, then the trailing 10 digits
/// for anything longer. Empty input yields an empty list.
#[must_use]
pub fn lookup_variants(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut variants = Vec::new();
    push_unique(&mut variants, trimmed.to_string());

    let normalized = normalize_handle(trimmed);
    if !normalized.is_empty() {
        push_unique(&mut variants, normalized.clone());
    }

    if !normalized.contains('@') {
        if normalized.len() == 10 {
            push_unique(&mut variants, format!("+1{normalized}"));
        }
        if normalized.len() > 10 {
            let tail = normalized[normalized.len() - 10..].to_string();
            push_unique(&mut variants, tail);
        }
    }

    variants
}

fn push_unique(variants: &mut Vec<String>, candidate: String) {
    if !variants.contains(&candidate) {
        variants.push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_email_to_lowercase() {
        assert_eq!(normalize_handle("  Apple@Phil-G.com "), "apple@phil-g.com");
    }

    #[test]
    fn strips_phone_punctuation_and_country_code() {
        assert_eq!(normalize_handle("+1 (555) 123-4567"), "5551234567");
        assert_eq!(normalize_handle("555.123.4567"), "5551234567");
    }

    #[test]
    fn keeps_leading_one_on_short_numbers() {
        // Ten digits starting with 1 is not a country-code prefix.
        assert_eq!(normalize_handle("1555123456"), "1555123456");
    }

    #[test]
    fn strips_leading_one_on_long_numbers() {
        assert_eq!(normalize_handle("+1 555 123 45678"), "55512345678");
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(normalize_handle(""), "");
        assert_eq!(normalize_handle("   "), "");
        assert!(lookup_variants("").is_empty());
        assert!(lookup_variants("  ").is_empty());
    }

    #[test]
    fn variants_are_ordered_and_deduped() {
        // The +1 re-prefix reproduces the raw form and must not repeat it.
        let variants = lookup_variants("+15551234567");
        assert_eq!(
            variants,
            vec!["+15551234567".to_string(), "5551234567".to_string()]
        );
    }

    #[test]
    fn ten_digit_number_gains_plus_one_variant() {
        let variants = lookup_variants("5551234567");
        assert_eq!(
            variants,
            vec!["5551234567".to_string(), "+15551234567".to_string()]
        );
    }

    #[test]
    fn long_number_gains_trailing_ten_variant() {
        let variants = lookup_variants("+4415551234567");
        assert_eq!(
            variants,
            vec![
                "+4415551234567".to_string(),
                "4415551234567".to_string(),
                "5551234567".to_string(),
            ]
        );
    }
}
