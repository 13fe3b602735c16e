use std::path::{Path, PathBuf};

use tracing::debug;

/// Result of a resolution attempt: either the first existing path, or the
/// full list of attempted paths for observability (§4.9).
pub struct ResolveOutcome {
    pub found: Option<PathBuf>,
    pub attempted: Vec<PathBuf>,
}

/// Pure function over six path-resolution strategies, independent of any
/// HTTP layer so it is table-driven-testable.
pub fn resolve(input: &str, inspection_root: &Path) -> ResolveOutcome {
    let mut attempted = Vec::new();

    // 1. literal path
    let literal = PathBuf::from(input);
    attempted.push(literal.clone());
    if literal.is_file() {
        return ResolveOutcome { found: Some(literal), attempted };
    }

    // 2. strip leading "src-api/"
    if let Some(stripped) = input.strip_prefix("src-api/") {
        let candidate = PathBuf::from(stripped);
        attempted.push(candidate.clone());
        if candidate.is_file() {
            return ResolveOutcome { found: Some(candidate), attempted };
        }
    }

    // 3. suffix after the last "inspection/" segment, joined under the root
    if let Some(idx) = input.rfind("inspection/") {
        let suffix = &input[idx + "inspection/".len()..];
        let candidate = inspection_root.join(suffix);
        attempted.push(candidate.clone());
        if candidate.is_file() {
            return ResolveOutcome { found: Some(candidate), attempted };
        }
    }

    let basename = Path::new(input)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(input)
        .to_string();

    // 4. enumerate dated subdirectories, exact basename match
    if let Ok(entries) = std::fs::read_dir(inspection_root) {
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                let candidate = entry.path().join(&basename);
                attempted.push(candidate.clone());
                if candidate.is_file() {
                    return ResolveOutcome { found: Some(candidate), attempted };
                }
            }
        }
    }

    // 5. recursive walk under the inspection root
    for entry in walkdir::WalkDir::new(inspection_root)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() && entry.file_name().to_str() == Some(basename.as_str()) {
            let candidate = entry.path().to_path_buf();
            attempted.push(candidate.clone());
            return ResolveOutcome { found: Some(candidate), attempted };
        }
    }
    attempted.push(inspection_root.join(format!("**/{}", basename)));

    // 6. glob for a frame-id pattern if basename decomposes into
    // `..._frameNNN_...`
    if let Some(pattern_path) = frame_id_glob(inspection_root, &basename) {
        attempted.push(pattern_path.clone());
        if let Ok(matches) = glob::glob(&pattern_path.to_string_lossy()) {
            for m in matches.flatten() {
                if m.is_file() {
                    return ResolveOutcome { found: Some(m), attempted };
                }
            }
        }
    }

    debug!(input, attempts = attempted.len(), "file resolution exhausted all strategies");
    ResolveOutcome { found: None, attempted }
}

/// Decomposes a basename like `foo_frame007_bar.bmp` into a glob pattern
/// `**/foo_frame*_bar.bmp` searched under `inspection_root`.
fn frame_id_glob(inspection_root: &Path, basename: &str) -> Option<PathBuf> {
    let idx = basename.find("_frame")?;
    let rest = &basename[idx + "_frame".len()..];
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let prefix = &basename[..idx + "_frame".len()];
    let suffix = &rest[digits_end..];
    Some(inspection_root.join(format!("**/{}*{}", prefix, suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn literal_path_resolves_first() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bmp");
        fs::write(&file, b"x").unwrap();
        let outcome = resolve(file.to_str().unwrap(), dir.path());
        assert_eq!(outcome.found, Some(file));
        assert_eq!(outcome.attempted.len(), 1);
    }

    #[test]
    fn strips_src_api_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("b.bmp");
        fs::write(&file, b"x").unwrap();
        let input = format!("src-api/{}", file.to_str().unwrap());
        let outcome = resolve(&input, dir.path());
        assert_eq!(outcome.found, Some(file));
    }

    #[test]
    fn dated_subdirectory_exact_basename() {
        let root = tempfile::tempdir().unwrap();
        let dated = root.path().join("20260101");
        fs::create_dir_all(&dated).unwrap();
        let file = dated.join("frame001.bmp");
        fs::write(&file, b"x").unwrap();

        let outcome = resolve("frame001.bmp", root.path());
        assert_eq!(outcome.found, Some(file));
    }

    #[test]
    fn recursive_walk_finds_nested_basename() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("20260101/sub/deeper");
        fs::create_dir_all(&nested).unwrap();
        let file = nested.join("target.bmp");
        fs::write(&file, b"x").unwrap();

        let outcome = resolve("target.bmp", root.path());
        assert_eq!(outcome.found, Some(file));
    }

    #[test]
    fn not_found_reports_all_attempts() {
        let root = tempfile::tempdir().unwrap();
        let outcome = resolve("nonexistent.bmp", root.path());
        assert!(outcome.found.is_none());
        assert!(!outcome.attempted.is_empty());
    }
}
