//! Path helpers shared by the cache, the backends and the facade.
//!
//! Storage paths are plain strings here, not `std::path::Path`: object
//! stores use `/` regardless of host, and some sources use `>` or `\\`.

/// Separator assumed when none can be inferred
pub const DEFAULT_SEPARATOR: &str = "/";

/// Recognised separator tokens, longest first so that a double backslash
/// is never read as two single ones.
const SEPARATOR_TOKENS: [&str; 4] = ["\\\\", "/", "\\", ">"];

/// Paths that are returned as-is when they consist of a single separator
const BARE_SEPARATORS: [&str; 3] = ["/", "\\\\", ">"];

/// Join path segments with `sep`.
///
/// Empty segments are skipped. At every join point one trailing `sep` is
/// trimmed from the left operand and one leading `sep` from the right one.
pub fn join_paths<S: AsRef<str>>(sep: &str, segments: &[S]) -> String {
    let mut segments = segments
        .iter()
        .map(AsRef::as_ref)
        .filter(|segment| !segment.is_empty());

    let mut path = match segments.next() {
        Some(first) => first.to_string(),
        None => return String::new(),
    };

    for segment in segments {
        if let Some(trimmed) = path.strip_suffix(sep) {
            path.truncate(trimmed.len());
        }
        path.push_str(sep);
        path.push_str(segment.strip_prefix(sep).unwrap_or(segment));
    }

    path
}

/// Make `child` relative to `parent`.
///
/// Only meaningful when `parent` is an ancestor of `child`; otherwise the
/// child comes back with just its leading separators removed.
pub fn relativize(parent: &str, child: &str, sep: &str) -> String {
    let stripped = child.strip_prefix(parent).unwrap_or(child);
    if sep.is_empty() {
        return stripped.to_string();
    }
    stripped.trim_start_matches(sep).to_string()
}

fn separator_at(s: &str) -> Option<&'static str> {
    SEPARATOR_TOKENS
        .iter()
        .find(|token| s.starts_with(**token))
        .copied()
}

/// Infer the separator a path is written with.
///
/// A path qualifies when it is an optional leading separator followed by
/// non-empty segments, all delimited by the same token, with at most one
/// trailing separator. Anything else (mixed delimiters, empty segments,
/// no segment at all) falls back to `/`.
pub fn infer_separator(path: &str) -> &'static str {
    if let Some(sep) = BARE_SEPARATORS.iter().find(|sep| **sep == path) {
        return *sep;
    }

    let mut chosen: Option<&'static str> = None;
    let mut rest = path;
    let mut segment_len = 0usize;
    let mut seen_segment = false;

    while let Some(ch) = rest.chars().next() {
        match separator_at(rest) {
            Some(token) => {
                let leading = !seen_segment && rest.len() == path.len();
                if segment_len == 0 && !leading {
                    return DEFAULT_SEPARATOR;
                }
                match chosen {
                    Some(current) if current != token => return DEFAULT_SEPARATOR,
                    _ => chosen = Some(token),
                }
                segment_len = 0;
                rest = &rest[token.len()..];
            }
            None => {
                segment_len += 1;
                seen_segment = true;
                rest = &rest[ch.len_utf8()..];
            }
        }
    }

    if !seen_segment {
        return DEFAULT_SEPARATOR;
    }

    chosen.unwrap_or(DEFAULT_SEPARATOR)
}
