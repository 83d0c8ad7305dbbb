//! Filename sanitization for URL-sourced inputs: strip non-safe chars,
//! fall back to `download.pdf`, ensure a `.pdf` suffix, and deduplicate
//! collisions by appending `_N`.

/// Derive a filesystem-safe basename from a URL's last path segment,
/// falling back to `download.pdf` when the URL has no usable segment.
pub fn filename_from_url(url: &str) -> String {
    let candidate = url
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("");

    let safe = sanitize_filename(candidate);
    ensure_pdf_suffix(&safe)
}

/// Strip characters that aren't safe across common filesystems, and fold
/// anything outside printable ASCII to `_` (no transliteration here; only
/// reserved/control characters are stripped).
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c if c.is_whitespace() => '_',
            c if !c.is_ascii() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim_matches('_');
    if trimmed.is_empty() {
        "download".to_string()
    } else if trimmed.len() > 150 {
        trimmed[..150].to_string()
    } else {
        trimmed.to_string()
    }
}

fn ensure_pdf_suffix(name: &str) -> String {
    if name.to_ascii_lowercase().ends_with(".pdf") {
        name.to_string()
    } else {
        format!("{name}.pdf")
    }
}

/// Append `_N` to `name` (before the extension) until it no longer collides
/// with anything in `taken`, per the admission controller's dedup rule.
pub fn deduplicate(name: &str, taken: &std::collections::HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) => (&name[..idx], &name[idx..]),
        None => (name, ""),
    };

    let mut n = 1u32;
    loop {
        let candidate = format!("{stem}_{n}{ext}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Explicit accented-character transliteration map for the Split stage's
/// category/subcategory filenames, fixed rather than derived so filenames
/// stay stable across re-runs. Covers the Hungarian diacritics the
/// categorize taxonomy and source documents use.
const TRANSLITERATION_MAP: &[(char, char)] = &[
    ('á', 'a'),
    ('Á', 'a'),
    ('é', 'e'),
    ('É', 'e'),
    ('í', 'i'),
    ('Í', 'i'),
    ('ó', 'o'),
    ('Ó', 'o'),
    ('ö', 'o'),
    ('Ö', 'o'),
    ('ő', 'o'),
    ('Ő', 'o'),
    ('ú', 'u'),
    ('Ú', 'u'),
    ('ü', 'u'),
    ('Ü', 'u'),
    ('ű', 'u'),
    ('Ű', 'u'),
];

/// Sanitize a category or subcategory display name into the Split stage's
/// output filename stem: transliterate per the map above, strip any byte
/// outside `[A-Za-z0-9 -]`, collapse whitespace to `_`, lowercase.
pub fn sanitize_category_name(name: &str) -> String {
    let transliterated: String = name
        .chars()
        .map(|c| {
            TRANSLITERATION_MAP
                .iter()
                .find(|(from, _)| *from == c)
                .map(|(_, to)| *to)
                .unwrap_or(c)
        })
        .collect();

    let stripped: String = transliterated
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || *c == '-')
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join("_").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_category_name_transliterates_and_lowercases() {
        assert_eq!(sanitize_category_name("Ördögűzés"), "ordoguzes");
        assert_eq!(sanitize_category_name("Élettan - Anatómia"), "elettan_-_anatomia");
        assert_eq!(sanitize_category_name("  Sok   Szóköz  "), "sok_szokoz");
    }

    #[test]
    fn falls_back_to_download_pdf() {
        assert_eq!(filename_from_url("https://example.com/"), "download.pdf");
    }

    #[test]
    fn ensures_pdf_suffix() {
        assert_eq!(filename_from_url("https://example.com/report"), "report.pdf");
        assert_eq!(
            filename_from_url("https://example.com/report.PDF"),
            "report.PDF"
        );
    }

    #[test]
    fn dedup_appends_suffix() {
        let mut taken = std::collections::HashSet::new();
        taken.insert("a.pdf".to_string());
        assert_eq!(deduplicate("a.pdf", &taken), "a_1.pdf");
        taken.insert("a_1.pdf".to_string());
        assert_eq!(deduplicate("a.pdf", &taken), "a_2.pdf");
    }

    #[test]
    fn strips_unsafe_characters() {
        assert_eq!(sanitize_filename("a/b\\c:d*e?.pdf"), "a_b_c_d_e_.pdf");
    }
}
