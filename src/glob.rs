//! Minimal glob dialect used by sync source configuration.
//!
//! Supported syntax: `?` (one non-separator character), `*` (any run
//! excluding `/`), `**/` (zero or more whole path segments), bare `**`
//! (anything, including `/`), and `{a,b,...}` alternation expanded
//! recursively into OR'd sub-patterns. Matches are anchored to the whole
//! relative path; partial matches are rejected.
//!
//! [`matches_glob`] is total: any input string (including malformed
//! patterns) yields a bool and never panics.

use regex::Regex;

const MAX_EXPANSIONS: usize = 256;

/// Returns true when `path` (a relative path using `/` separators)
/// matches `pattern`.
pub fn matches_glob(path: &str, pattern: &str) -> bool {
    let mut expanded = Vec::new();
    expand_braces(pattern, &mut expanded, 0);
    expanded
        .iter()
        .any(|p| to_regex(p).map(|re| re.is_match(path)).unwrap_or(false))
}

/// Expand `{a,b}` groups into one pattern per alternative. Unbalanced
/// braces are passed through literally.
fn expand_braces(pattern: &str, out: &mut Vec<String>, depth: usize) {
    if out.len() >= MAX_EXPANSIONS || depth > 8 {
        out.push(pattern.to_string());
        return;
    }
    if let Some(open) = pattern.find('{') {
        if let Some(close) = pattern[open..].find('}').map(|i| open + i) {
            let prefix = &pattern[..open];
            let suffix = &pattern[close + 1..];
            for alt in pattern[open + 1..close].split(',') {
                expand_braces(&format!("{}{}{}", prefix, alt, suffix), out, depth + 1);
            }
            return;
        }
    }
    out.push(pattern.to_string());
}

/// Translate one brace-free pattern into an anchored regex.
fn to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let rest = &pattern[i..];
        if rest.starts_with("**/") {
            re.push_str("(?:[^/]+/)*");
            i += 3;
        } else if rest.starts_with("**") {
            re.push_str(".*");
            i += 2;
        } else if bytes[i] == b'*' {
            re.push_str("[^/]*");
            i += 1;
        } else if bytes[i] == b'?' {
            re.push_str("[^/]");
            i += 1;
        } else {
            // Literal passthrough; escape regex metacharacters.
            let ch = rest.chars().next()?;
            re.push_str(&regex::escape(&ch.to_string()));
            i += ch.len_utf8();
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_within_segment() {
        assert!(matches_glob("c.md", "*.md"));
        assert!(!matches_glob("a/c.md", "*.md"));
    }

    #[test]
    fn double_star_crosses_segments() {
        assert!(matches_glob("a/b/c.md", "**/*.md"));
        assert!(matches_glob("c.md", "**/*.md"));
        assert!(matches_glob("a/b/c.md", "**"));
    }

    #[test]
    fn double_star_slash_matches_zero_segments() {
        assert!(matches_glob("a/b", "a/**/b"));
        assert!(matches_glob("a/x/y/b", "a/**/b"));
    }

    #[test]
    fn extension_alternation() {
        assert!(matches_glob("notes/a.md", "**/*.{md,pdf}"));
        assert!(matches_glob("a.pdf", "**/*.{md,pdf}"));
        assert!(!matches_glob("a/c.txt", "**/*.{md,pdf}"));
    }

    #[test]
    fn question_mark_is_single_char() {
        assert!(matches_glob("a1.md", "a?.md"));
        assert!(!matches_glob("a12.md", "a?.md"));
        assert!(!matches_glob("a/.md", "a?.md"));
    }

    #[test]
    fn whole_string_is_anchored() {
        assert!(!matches_glob("prefix-c.md-suffix", "*.md"));
        assert!(!matches_glob("c.mdx", "*.md"));
    }

    #[test]
    fn metacharacters_are_literal() {
        assert!(matches_glob("a+b.md", "a+b.md"));
        assert!(!matches_glob("aab.md", "a+b.md"));
    }

    #[test]
    fn malformed_patterns_never_panic() {
        assert!(!matches_glob("a.md", "{md"));
        assert!(matches_glob("a.{md", "a.{md"));
        assert!(!matches_glob("anything", ""));
        assert!(matches_glob("", ""));
    }
}
