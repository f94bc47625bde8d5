//! Source tree discovery.
//!
//! [`walk`] enumerates every regular file under a root directory and infers
//! the docs hierarchy from sibling files: a file `guides.mdx` (or
//! `guides.md`) next to a directory `guides/` becomes the parent of every
//! document inside that directory, and of documents in its subdirectories
//! unless a deeper directory defines its own hierarchy file.
//!
//! [`discover`] applies the configured include/exclude/ignore filters and
//! turns the walk into [`DocumentDescriptor`]s keyed by extension-less path.

use std::collections::{BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::DocumentDescriptor;

/// Extensions recognised for hierarchy-defining sibling files, in order of
/// preference.
const HIERARCHY_EXTENSIONS: [&str; 2] = ["mdx", "md"];

const DEFAULT_EXCLUDES: [&str; 2] = ["**/.git/**", "**/node_modules/**"];

/// One regular file found under the walk root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Root-relative path with `/` separators, extension included.
    pub relative: String,
    pub file_path: PathBuf,
    /// Extension-less relative path of the governing hierarchy file, if any.
    pub parent: Option<String>,
}

/// Walk `root` recursively, returning entries sorted by relative path.
///
/// Unreadable entries (permission errors, broken symlinks, loops) are
/// logged and skipped. Only a missing root is an error.
pub fn walk(root: &Path, follow_symlinks: bool) -> Result<Vec<WalkEntry>> {
    if !root.is_dir() {
        bail!("Source root does not exist: {}", root.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(follow_symlinks) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                warn!(path = %path, error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = match relative_key(root, entry.path()) {
            Some(relative) => relative,
            None => {
                warn!(path = %entry.path().display(), "skipping entry outside the source root");
                continue;
            }
        };
        files.push((relative, entry.into_path()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    let known: HashSet<&str> = files.iter().map(|(rel, _)| rel.as_str()).collect();

    let entries = files
        .iter()
        .map(|(relative, file_path)| WalkEntry {
            relative: relative.clone(),
            file_path: file_path.clone(),
            parent: hierarchy_parent(relative, &known),
        })
        .collect();
    Ok(entries)
}

/// Deepest ancestor directory `D` of `relative` that has a `D.mdx` or
/// `D.md` sibling among the walked files.
fn hierarchy_parent(relative: &str, known: &HashSet<&str>) -> Option<String> {
    let mut dir = relative.rsplit_once('/').map(|(dir, _)| dir);
    while let Some(current) = dir {
        let defined = HIERARCHY_EXTENSIONS
            .iter()
            .any(|ext| known.contains(format!("{}.{}", current, ext).as_str()));
        if defined {
            return Some(current.to_string());
        }
        dir = current.rsplit_once('/').map(|(parent, _)| parent);
    }
    None
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Strip the final extension from a `/`-separated relative path.
pub fn page_path(relative: &str) -> String {
    let (dir, file) = match relative.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, relative),
    };
    let stem = match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    };
    match dir {
        Some(dir) => format!("{}/{}", dir, stem),
        None => stem.to_string(),
    }
}

/// Walk the configured source root and build document descriptors.
///
/// Descriptors are sorted by page path. When two files map to the same page
/// path (`a.md` and `a.mdx`), the `.mdx` file wins and the other is skipped
/// with a warning.
pub fn discover(config: &Config) -> Result<Vec<DocumentDescriptor>> {
    let source = &config.source;
    let include_set = build_globset(&source.include_globs)?;

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(source.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let ignored: BTreeSet<&str> = source.ignore.iter().map(|s| s.trim_matches('/')).collect();

    let mut descriptors: Vec<(DocumentDescriptor, String)> = Vec::new();
    for entry in walk(&source.root, source.follow_symlinks)? {
        if exclude_set.is_match(&entry.relative) || !include_set.is_match(&entry.relative) {
            continue;
        }
        let path = page_path(&entry.relative);
        if ignored.contains(entry.relative.as_str()) || ignored.contains(path.as_str()) {
            debug!(path = %entry.relative, "ignored by configuration");
            continue;
        }
        descriptors.push((
            DocumentDescriptor {
                path,
                parent_path: entry.parent,
                source: source.label.clone(),
                file_path: entry.file_path,
            },
            entry.relative,
        ));
    }

    descriptors.sort_by(|a, b| {
        a.0.path
            .cmp(&b.0.path)
            .then_with(|| is_mdx(&b.1).cmp(&is_mdx(&a.1)))
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut result: Vec<DocumentDescriptor> = Vec::with_capacity(descriptors.len());
    for (descriptor, relative) in descriptors {
        if result.last().map(|d| d.path == descriptor.path).unwrap_or(false) {
            warn!(path = %relative, page = %descriptor.path, "duplicate page path, skipping file");
            continue;
        }
        result.push(descriptor);
    }
    Ok(result)
}

fn is_mdx(relative: &str) -> bool {
    relative.ends_with(".mdx")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "# doc\n").unwrap();
    }

    fn config_for(root: &Path) -> Config {
        let mut config = Config::default();
        config.source.root = root.to_path_buf();
        config
    }

    fn parents(descriptors: &[DocumentDescriptor]) -> Vec<(&str, Option<&str>)> {
        descriptors
            .iter()
            .map(|d| (d.path.as_str(), d.parent_path.as_deref()))
            .collect()
    }

    #[test]
    fn test_hierarchy_propagates_to_subdirectories() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "guides.mdx");
        touch(tmp.path(), "guides/intro.mdx");
        touch(tmp.path(), "guides/sub/x.mdx");

        let descriptors = discover(&config_for(tmp.path())).unwrap();
        assert_eq!(
            parents(&descriptors),
            vec![
                ("guides", None),
                ("guides/intro", Some("guides")),
                ("guides/sub/x", Some("guides")),
            ]
        );
    }

    #[test]
    fn test_nested_hierarchy_file_takes_over() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "guides.mdx");
        touch(tmp.path(), "guides/intro.mdx");
        touch(tmp.path(), "guides/sub.mdx");
        touch(tmp.path(), "guides/sub/x.mdx");

        let descriptors = discover(&config_for(tmp.path())).unwrap();
        assert_eq!(
            parents(&descriptors),
            vec![
                ("guides", None),
                ("guides/intro", Some("guides")),
                ("guides/sub", Some("guides")),
                ("guides/sub/x", Some("guides/sub")),
            ]
        );
    }

    #[test]
    fn test_md_hierarchy_file_and_no_parent_without_sibling() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "api.md");
        touch(tmp.path(), "api/auth.md");
        touch(tmp.path(), "misc/notes.md");

        let descriptors = discover(&config_for(tmp.path())).unwrap();
        assert_eq!(
            parents(&descriptors),
            vec![
                ("api", None),
                ("api/auth", Some("api")),
                ("misc/notes", None),
            ]
        );
        assert!(descriptors.iter().all(|d| d.source == "guide"));
    }

    #[test]
    fn test_filters_and_ordering() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "b.mdx");
        touch(tmp.path(), "a.md");
        touch(tmp.path(), "image.png");
        touch(tmp.path(), "node_modules/pkg/readme.md");
        touch(tmp.path(), "drafts/wip.mdx");
        touch(tmp.path(), "skip-me.mdx");

        let mut config = config_for(tmp.path());
        config.source.exclude_globs = vec!["drafts/**".to_string()];
        config.source.ignore = vec!["skip-me.mdx".to_string()];

        let paths: Vec<String> = discover(&config)
            .unwrap()
            .into_iter()
            .map(|d| d.path)
            .collect();
        assert_eq!(paths, vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_page_path_prefers_mdx() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "page.md");
        touch(tmp.path(), "page.mdx");

        let descriptors = discover(&config_for(tmp.path())).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert!(descriptors[0].file_path.ends_with("page.mdx"));
    }

    #[test]
    fn test_walk_lists_every_regular_file_sorted() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "z.txt");
        touch(tmp.path(), "a/b.mdx");
        touch(tmp.path(), "a.mdx");

        let relatives: Vec<String> = walk(tmp.path(), false)
            .unwrap()
            .into_iter()
            .map(|e| e.relative)
            .collect();
        assert_eq!(relatives, vec!["a.mdx", "a/b.mdx", "z.txt"]);
    }

    #[test]
    fn test_missing_root_is_error() {
        let tmp = TempDir::new().unwrap();
        assert!(walk(&tmp.path().join("nope"), false).is_err());
    }

    #[test]
    fn test_page_path() {
        assert_eq!(page_path("guides/intro.mdx"), "guides/intro");
        assert_eq!(page_path("index.md"), "index");
        assert_eq!(page_path("a/b.test.mdx"), "a/b.test");
        assert_eq!(page_path("a/.hidden"), "a/.hidden");
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_symlink_does_not_abort_walk() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "ok.mdx");
        std::os::unix::fs::symlink(tmp.path().join("missing.mdx"), tmp.path().join("dangling.mdx"))
            .unwrap();

        for follow in [false, true] {
            let relatives: Vec<String> = walk(tmp.path(), follow)
                .unwrap()
                .into_iter()
                .map(|e| e.relative)
                .collect();
            assert_eq!(relatives, vec!["ok.mdx"]);
        }
    }
}
