//! Test-file discovery.
//!
//! Walks the user-supplied roots for `*.canary` files and hands each to
//! the directive parser. Results are sorted by path so discovery order
//! (and therefore case ids) is stable across runs.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::generator::Generator;
use crate::testfile::{TestParser, TEST_FILE_EXT};

/// Find and parse every test file beneath `roots`. A root may also name a
/// single test file directly.
pub fn discover(roots: &[PathBuf], parser: &dyn TestParser) -> anyhow::Result<Vec<Generator>> {
    let mut generators = Vec::new();
    for root in roots {
        if root.is_file() {
            let rel_dir = PathBuf::new();
            generators.extend(parser.parse(root, &rel_dir)?);
            continue;
        }
        for path in find_test_files(root)? {
            let rel_dir = path
                .parent()
                .and_then(|dir| dir.strip_prefix(root).ok())
                .map(Path::to_path_buf)
                .unwrap_or_default();
            tracing::debug!(path = %path.display(), "parsing test file");
            generators.extend(parser.parse(&path, &rel_dir)?);
        }
    }
    tracing::info!(count = generators.len(), "discovered test generators");
    Ok(generators)
}

/// All `*.canary` files beneath `root`, sorted.
fn find_test_files(root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/**/*.{}",
        glob::Pattern::escape(&root.to_string_lossy()),
        TEST_FILE_EXT
    );
    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .with_context(|| format!("bad discovery pattern '{pattern}'"))?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}
