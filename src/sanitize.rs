use std::fs;
use std::path::Path;

/// Maximum filename length before the `.png`/`.json` suffix, chosen so
/// the result stays well under common filesystem path-component limits.
const MAX_NAME_LEN: usize = 240;

/// Maps a URL to a path-safe filename stem. Mirrors
/// `webcap.helpers.sanitize_filename`: every byte outside
/// `[A-Za-z0-9_.-]` becomes `-`, runs of `-` collapse to one, and the
/// result is truncated to `MAX_NAME_LEN` bytes.
pub fn sanitize_filename(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_dash = false;
    for byte in input.bytes() {
        let ch = byte as char;
        let keep = ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' || ch == '-';
        if keep {
            out.push(ch);
            last_was_dash = ch == '-';
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    if out.len() > MAX_NAME_LEN {
        out.truncate(MAX_NAME_LEN);
    }
    out
}

/// Treats each input as a URL, unless it names an existing file, in which
/// case every non-blank line of that file is taken as a URL. Mirrors
/// `webcap.helpers.str_or_file_list`, preserving first-seen order rather
/// than the Python original's dict-insertion order (same effect).
pub fn load_urls<I, S>(inputs: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();
    let mut push = |value: String| {
        if seen.insert(value.clone()) {
            result.push(value);
        }
    };

    for entry in inputs {
        let entry = entry.as_ref().trim().to_string();
        if entry.is_empty() {
            continue;
        }
        let path = Path::new(&entry);
        if path.is_file() {
            if let Ok(contents) = fs::read_to_string(path) {
                for line in contents.lines() {
                    let line = line.trim();
                    if !line.is_empty() {
                        push(line.to_string());
                    }
                }
                continue;
            }
        }
        push(entry);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_unsafe_bytes() {
        assert_eq!(sanitize_filename("https://example.com/a?b=c"), "https-example.com-a-b-c");
    }

    #[test]
    fn collapses_runs_of_dashes() {
        assert_eq!(sanitize_filename("a///b"), "a-b");
    }

    #[test]
    fn is_idempotent_and_stable() {
        let url = "https://example.com:8080/path?x=1&y=2";
        assert_eq!(sanitize_filename(url), sanitize_filename(url));
    }

    #[test]
    fn truncates_long_urls() {
        let long = format!("https://example.com/{}", "a".repeat(500));
        let sanitized = sanitize_filename(&long);
        assert!(sanitized.len() <= MAX_NAME_LEN);
    }

    #[test]
    fn load_urls_dedupes_preserving_order() {
        let urls = load_urls(["https://a.test", "https://b.test", "https://a.test"]);
        assert_eq!(urls, vec!["https://a.test", "https://b.test"]);
    }

    #[test]
    fn load_urls_reads_file_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(file, "https://a.test").unwrap();
        writeln!(file, "https://b.test").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let urls = load_urls([path]);
        assert_eq!(urls, vec!["https://a.test", "https://b.test"]);
    }
}
