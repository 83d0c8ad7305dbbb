//! Question-marker detection: a case-insensitive regex matching a
//! positive integer followed by the Hungarian word "pont" ("points"),
//! ignoring matches preceded by digit-dash (e.g. "12-pont", a range, not a
//! marker) and matches followed by disqualifying words that mean this is
//! scoring-rule prose rather than a question's own point value ("adható",
//! "válaszonként", "helyes válasz", "pontonként"). Valid markers are sorted
//! by y-coordinate and deduplicated within 10 y-units (poppler sometimes
//! reports the same visual line as two adjacent bounding boxes).

use std::sync::OnceLock;

use regex::Regex;

use crate::collaborators::rasterizer::LineText;

const DISQUALIFYING_FOLLOWERS: &[&str] = &["adható", "válaszonként", "helyes válasz", "pontonként"];
const DEDUP_WINDOW: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Marker {
    pub y: f32,
    pub points: u32,
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+)\s*pont(\w*)").expect("static marker regex"))
}

/// Scan every line for question markers, returning them sorted by
/// y-coordinate with near-duplicates collapsed.
pub fn find_markers(lines: &[LineText]) -> Vec<Marker> {
    let re = marker_regex();
    let mut candidates: Vec<Marker> = Vec::new();

    for line in lines {
        for caps in re.captures_iter(&line.text) {
            let whole = caps.get(0).expect("group 0 always matches");
            let digits = &caps[1];
            let suffix = &caps[2];

            if preceded_by_digit_dash(&line.text, whole.start()) {
                continue;
            }
            if suffix.to_lowercase().starts_with("onként") {
                continue; // "pontonként" itself, not a marker
            }
            let Ok(points) = digits.parse::<u32>() else {
                continue;
            };
            if points == 0 {
                continue;
            }
            if followed_by_disqualifying_word(&line.text[whole.end()..]) {
                continue;
            }

            candidates.push(Marker {
                y: line.y_min,
                points,
            });
        }
    }

    candidates.sort_by(|a, b| a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal));

    let mut deduped: Vec<Marker> = Vec::new();
    for candidate in candidates {
        match deduped.last() {
            Some(last) if (candidate.y - last.y).abs() < DEDUP_WINDOW => continue,
            _ => deduped.push(candidate),
        }
    }
    deduped
}

fn preceded_by_digit_dash(text: &str, match_start: usize) -> bool {
    let prefix = &text[..match_start];
    let Some(before_dash) = prefix.strip_suffix('-') else {
        return false;
    };
    before_dash.chars().next_back().is_some_and(|c| c.is_ascii_digit())
}

fn followed_by_disqualifying_word(after: &str) -> bool {
    let after_lower = after.trim_start().to_lowercase();
    DISQUALIFYING_FOLLOWERS
        .iter()
        .any(|word| after_lower.starts_with(&word.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(y: f32, text: &str) -> LineText {
        LineText {
            y_min: y,
            text: text.to_string(),
        }
    }

    #[test]
    fn finds_a_simple_marker() {
        let markers = find_markers(&[line(100.0, "1. kérdés (5 pont)")]);
        assert_eq!(markers, vec![Marker { y: 100.0, points: 5 }]);
    }

    #[test]
    fn ignores_digit_dash_prefixed_numbers() {
        let markers = find_markers(&[line(100.0, "lásd a 12-pontos szabályt")]);
        assert!(markers.is_empty());
    }

    #[test]
    fn ignores_disqualifying_follow_words() {
        let markers = find_markers(&[
            line(50.0, "2 pont adható válaszonként"),
            line(60.0, "3 pont válaszonként jár"),
            line(70.0, "1 pont helyes válasz esetén"),
            line(80.0, "4 pontonként emelkedik"),
        ]);
        assert!(markers.is_empty());
    }

    #[test]
    fn dedupes_markers_within_ten_y_units() {
        let markers = find_markers(&[
            line(100.0, "5 pont"),
            line(105.0, "5 pont"),
            line(130.0, "3 pont"),
        ]);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].y, 100.0);
        assert_eq!(markers[1].y, 130.0);
    }

    #[test]
    fn sorts_by_y_regardless_of_input_order() {
        let markers = find_markers(&[line(200.0, "2 pont"), line(50.0, "4 pont")]);
        assert_eq!(markers[0].y, 50.0);
        assert_eq!(markers[1].y, 200.0);
    }
}
