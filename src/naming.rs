use std::path::{Path, PathBuf};

/// Extension used when a transformer has no output name pattern.
pub const DEFAULT_OUTPUT_EXTENSION: &str = "txt";

const WILDCARD: char = '*';

/// Derives the output file name for `input_path`.
///
/// - no pattern (or an empty one): `<stem>.txt`
/// - a pattern containing `*`: the first `*` is replaced by the input stem
/// - any other pattern is used verbatim, so distinct inputs share one name
///
/// # Examples
///
/// ```
/// use llm_transformer::output_name;
///
/// assert_eq!(output_name(Some("*_out.md"), "notes/abc.txt"), "abc_out.md");
/// assert_eq!(output_name(None, "notes/abc.txt"), "abc.txt");
/// assert_eq!(output_name(Some("output.txt"), "notes/abc.txt"), "output.txt");
/// ```
#[must_use]
pub fn output_name(pattern: Option<&str>, input_path: impl AsRef<Path>) -> String {
    let stem = input_path
        .as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    match pattern.filter(|p| !p.is_empty()) {
        None => format!("{stem}.{DEFAULT_OUTPUT_EXTENSION}"),
        Some(p) if p.contains(WILDCARD) => p.replacen(WILDCARD, &stem, 1),
        Some(p) => p.to_string(),
    }
}

/// Places an output file under `output_root`, mirroring the directory part of
/// the input's path relative to the walk root.
#[must_use]
pub fn output_path(
    output_root: &Path,
    relative_input: &Path,
    pattern: Option<&str>,
) -> PathBuf {
    mirrored_path(output_root, relative_input, &output_name(pattern, relative_input))
}

/// Joins `file_name` onto `output_root` under the directory part of `relative_input`.
#[must_use]
pub fn mirrored_path(output_root: &Path, relative_input: &Path, file_name: &str) -> PathBuf {
    match relative_input.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => output_root.join(dir).join(file_name),
        _ => output_root.join(file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_pattern() {
        assert_eq!(output_name(Some("*_out.md"), "/data/abc.txt"), "abc_out.md");
    }

    #[test]
    fn test_only_first_wildcard_is_replaced() {
        assert_eq!(output_name(Some("*-*.md"), "abc.txt"), "abc-*.md");
    }

    #[test]
    fn test_default_name() {
        assert_eq!(output_name(None, "/data/abc.txt"), "abc.txt");
        assert_eq!(output_name(Some(""), "/data/abc.txt"), "abc.txt");
    }

    #[test]
    fn test_fixed_pattern_passthrough() {
        assert_eq!(output_name(Some("output.txt"), "/data/abc.txt"), "output.txt");
        assert_eq!(output_name(Some("output.txt"), "/other/xyz.md"), "output.txt");
    }

    #[test]
    fn test_stem_keeps_inner_dots() {
        assert_eq!(output_name(None, "archive.tar.gz"), "archive.tar.txt");
        assert_eq!(output_name(Some("*.json"), ".env"), ".env.json");
    }

    #[test]
    fn test_output_path_mirrors_subdirectories() {
        let root = Path::new("/out");
        assert_eq!(
            output_path(root, Path::new("sub/deep/b.txt"), Some("*.md")),
            PathBuf::from("/out/sub/deep/b.md")
        );
        assert_eq!(
            output_path(root, Path::new("a.txt"), None),
            PathBuf::from("/out/a.txt")
        );
    }
}
