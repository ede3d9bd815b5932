use scraper::Html;

/// Leading number of `raw` after dropping everything except digits, `.` and `,`.
///
/// `,` is read as the decimal separator; anything after a second separator is ignored.
pub fn extract_price(raw: &str) -> f64 {
    let normalized = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .map(|c| if c == ',' { '.' } else { c })
        .collect::<String>();
    leading_float(&normalized).unwrap_or(0.0)
}

/// Same reading as prices, clamped to the 0..=5 star range.
pub fn extract_rating(raw: &str) -> f64 {
    extract_price(raw).clamp(0.0, 5.0)
}

/// Leading ascii digits only; `"12 adet"` is 12, `"yok"` is 0.
pub fn leading_int(raw: &str) -> i64 {
    let digits = raw
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>();
    digits.parse().unwrap_or(0)
}

fn leading_float(value: &str) -> Option<f64> {
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (idx, c) in value.char_indices() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end = idx + c.len_utf8();
    }
    if !seen_digit {
        return None;
    }
    value[..end].trim_end_matches('.').parse().ok()
}

/// Drops markup and collapses whitespace runs to single spaces.
pub fn clean_html(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
