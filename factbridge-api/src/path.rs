//! Dotted fact paths
//!
//! A path is an ordered list of segments. Two textual forms exist:
//!
//! - the *query* form typed by users, `os."release.full".major`, where a
//!   quoted segment may contain dots;
//! - the *canonical key* used by child caches, which always starts with a
//!   separator so keys can be concatenated: `.os."release.full".major`.

/// Build the canonical cache key for a list of segments.
///
/// Segments are joined with `.` and every segment containing a literal `.`
/// is wrapped in double quotes. The leading separator is kept.
///
/// ```
/// use factbridge_api::path::canonical_key;
///
/// assert_eq!(canonical_key(&["a", "b.c", "d"]), ".a.\"b.c\".d");
/// assert_eq!(canonical_key::<&str>(&[]), "");
/// ```
pub fn canonical_key<S: AsRef<str>>(segments: &[S]) -> String {
    segments.iter().fold(String::new(), |mut key, segment| {
        let segment = segment.as_ref();
        key.push('.');
        if segment.contains('.') {
            key.push('"');
            key.push_str(segment);
            key.push('"');
        } else {
            key.push_str(segment);
        }
        key
    })
}

/// Split a user query into segments.
///
/// Dots inside double quotes do not split; the quotes themselves are
/// dropped. An unterminated quote extends to the end of the query.
pub fn split_query(query: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for ch in query.chars() {
        match ch {
            '"' => quoted = !quoted,
            '.' if !quoted => segments.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    segments.push(current);
    segments
}
