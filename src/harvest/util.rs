use chrono::{SecondsFormat, Utc};

/// UTC timestamp in RFC 3339, second precision. Used for `last_seen_at`
/// ledger cells and log file names.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Last path segment of a URL, percent-decoding left alone. Falls back to
/// `download` when the path ends with a slash.
pub fn filename_from_url(url: &str) -> String {
    let no_query = url.split(['?', '#']).next().unwrap_or(url);
    let last = no_query.rsplit('/').next().unwrap_or("");
    if last.is_empty() {
        "download".to_string()
    } else {
        last.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::filename_from_url;

    #[test]
    fn filename_strips_query_and_fragment() {
        assert_eq!(
            filename_from_url("https://x.gov/files/tab1.xlsx?dl=1#top"),
            "tab1.xlsx"
        );
    }

    #[test]
    fn filename_falls_back_on_trailing_slash() {
        assert_eq!(filename_from_url("https://x.gov/files/"), "download");
    }
}
