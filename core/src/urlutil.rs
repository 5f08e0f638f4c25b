use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::TransferError;

/// Parses a user-supplied server/file URL, injecting `http://` when no
/// scheme is present so `example.com:8080` and `http://example.com:8080`
/// behave the same way.
pub fn parse_url(raw: &str) -> Result<Url, TransferError> {
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let url = Url::parse(&candidate)
        .map_err(|e| TransferError::Validation(format!("invalid url {raw:?}: {e}")))?;
    if url.host_str().is_none() {
        return Err(TransferError::Validation(format!("url {raw:?} has no host")));
    }
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(TransferError::Validation(format!(
            "url {raw:?} has unsupported scheme {:?}",
            url.scheme()
        )));
    }
    Ok(url)
}

/// Lexically cleans a `/`-separated path the way Go's `path.Clean` does:
/// backslashes are normalized to forward slashes first, then `.` segments
/// are dropped, `..` segments pop the previous segment (or are kept
/// verbatim at the front of a relative path), and repeated slashes
/// collapse. The result never ends in `/` unless it is the root.
pub fn clean_path(raw: &str) -> String {
    let normalized = raw.replace('\\', "/");
    let rooted = normalized.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if let Some(last) = out.last() {
                    if *last != ".." {
                        out.pop();
                        continue;
                    }
                }
                if !rooted {
                    out.push("..");
                }
            }
            s => out.push(s),
        }
    }
    let joined = out.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Number of directory levels in a cleaned relative path: `"a"` is 0,
/// `"a/b"` is 1, `"a/b/c"` is 2. Mirrors the original `getDirCount` helper
/// used to reject anything but a flat, single-level file name.
pub fn dir_depth(cleaned_relative: &str) -> usize {
    cleaned_relative.matches('/').count()
}

static CONTENT_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^bytes (\d+)-(\d+)/(\d+)$").unwrap());

/// Parses a `Content-Range: bytes <start>-<end>/<size>` header value,
/// validating `start <= end < size`.
pub fn parse_content_range(value: &str) -> Result<(u64, u64, u64), TransferError> {
    let caps = CONTENT_RANGE_RE
        .captures(value.trim())
        .ok_or_else(|| TransferError::Protocol(format!("malformed content-range: {value:?}")))?;
    let start: u64 = caps[1]
        .parse()
        .map_err(|_| TransferError::Protocol(format!("bad content-range: {value:?}")))?;
    let end: u64 = caps[2]
        .parse()
        .map_err(|_| TransferError::Protocol(format!("bad content-range: {value:?}")))?;
    let size: u64 = caps[3]
        .parse()
        .map_err(|_| TransferError::Protocol(format!("bad content-range: {value:?}")))?;
    if start > end || end >= size {
        return Err(TransferError::Protocol(format!(
            "inconsistent content-range: {value:?}"
        )));
    }
    Ok((start, end, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_url_injects_scheme() {
        let u = parse_url("example.com:8080").unwrap();
        assert_eq!(u.scheme(), "http");
        assert_eq!(u.host_str(), Some("example.com"));
        assert_eq!(u.port(), Some(8080));
    }

    #[test]
    fn parse_url_keeps_explicit_scheme() {
        let u = parse_url("https://example.com").unwrap();
        assert_eq!(u.scheme(), "https");
    }

    #[test]
    fn parse_url_rejects_hostless() {
        assert!(parse_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn parse_url_rejects_disallowed_scheme() {
        assert!(parse_url("ftp://example.com").is_err());
        assert!(parse_url("file://example.com/etc/passwd").is_err());
    }

    #[test]
    fn clean_path_collapses_dot_segments() {
        assert_eq!(clean_path("a/./b/../c"), "a/c");
        assert_eq!(clean_path("a\\b\\c"), "a/b/c");
        assert_eq!(clean_path("../../etc/passwd"), "../../etc/passwd");
        assert_eq!(clean_path("/../../etc/passwd"), "/etc/passwd");
        assert_eq!(clean_path("foo.txt"), "foo.txt");
        assert_eq!(clean_path(""), ".");
    }

    #[test]
    fn dir_depth_counts_separators() {
        assert_eq!(dir_depth("foo.txt"), 0);
        assert_eq!(dir_depth("a/b.txt"), 1);
        assert_eq!(dir_depth("a/b/c.txt"), 2);
    }

    #[test]
    fn content_range_parses_valid() {
        assert_eq!(parse_content_range("bytes 0-99/1000").unwrap(), (0, 99, 1000));
    }

    #[test]
    fn content_range_rejects_inconsistent() {
        assert!(parse_content_range("bytes 100-50/1000").is_err());
        assert!(parse_content_range("bytes 0-999/1000").is_err());
        assert!(parse_content_range("nonsense").is_err());
    }
}
