use std::path::{Path, PathBuf};

use roost_core::Runtime;

use crate::error::HostError;
use crate::sandbox::normalize_rel_path;

const MAX_LISTED_FILES: usize = 40;

pub fn manifest_names(runtime: Runtime) -> &'static [&'static str] {
    match runtime {
        Runtime::Python => &["requirements.txt", "pyproject.toml", "uv.lock"],
        Runtime::Node => &["package.json"],
    }
}

pub fn preferred_entry_points(runtime: Runtime) -> &'static [&'static str] {
    match runtime {
        Runtime::Python => &["main.py", "bot.py", "app.py", "__main__.py"],
        Runtime::Node => &["index.js", "bot.js", "app.js", "main.js"],
    }
}

pub fn source_extension(runtime: Runtime) -> &'static str {
    match runtime {
        Runtime::Python => "py",
        Runtime::Node => "js",
    }
}

/// Zip local-file, central-directory and empty-archive magics.
pub fn archive_is_zip(bytes: &[u8]) -> bool {
    let Some(header) = bytes.get(..4) else {
        return false;
    };
    matches!(
        header,
        [b'P', b'K', 0x03, 0x04]
            | [b'P', b'K', 0x05, 0x06]
            | [b'P', b'K', 0x07, 0x08]
            | [b'P', b'K', 0x01, 0x02]
    )
}

/// Extract an uploaded archive, refusing entries whose names would escape
/// `out_dir`. Files are written through a temp name and renamed into place.
pub fn extract_zip_safely(zip_path: &Path, out_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(out_dir)?;
    let f = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(f)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().to_string();
        let trimmed = name.trim_end_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        let rel = normalize_rel_path(trimmed)
            .map_err(|e| anyhow::anyhow!("invalid zip path {trimmed:?}: {e}"))?;
        if rel.as_os_str().is_empty() {
            continue;
        }

        let out_path = out_dir.join(&rel);
        if name.ends_with('/') {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = out_path.with_extension("tmp");
        let mut out = std::fs::File::create(&tmp_path)?;
        std::io::copy(&mut file, &mut out)?;
        out.sync_all().ok();
        std::fs::rename(&tmp_path, &out_path)?;
    }

    Ok(())
}

/// Collect every regular file under `root` as a root-relative path, sorted.
/// Symlinks are skipped entirely.
pub fn collect_files(root: &Path) -> Vec<PathBuf> {
    fn walk(root: &Path, cur: &Path, out: &mut Vec<PathBuf>) {
        let rd = match std::fs::read_dir(cur) {
            Ok(v) => v,
            Err(_) => return,
        };
        for e in rd.flatten() {
            let path = e.path();
            let meta = match std::fs::symlink_metadata(&path) {
                Ok(m) => m,
                Err(_) => continue,
            };
            if meta.file_type().is_symlink() {
                continue;
            }
            if meta.is_dir() {
                walk(root, &path, out);
                continue;
            }
            if meta.is_file()
                && let Ok(rel) = path.strip_prefix(root)
            {
                out.push(rel.to_path_buf());
            }
        }
    }

    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

/// The result of manifest/entry-point discovery over an extracted tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotLayout {
    /// Manifest directory, relative to the extraction root.
    pub bot_directory: PathBuf,
    /// Entry source file, relative to `bot_directory`.
    pub entry_point: PathBuf,
}

fn file_name_matches(path: &Path, candidates: &[&str]) -> Option<usize> {
    let name = path.file_name()?.to_str()?;
    candidates.iter().position(|c| name.eq_ignore_ascii_case(c))
}

fn has_source_extension(path: &Path, runtime: Runtime) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(source_extension(runtime)))
}

fn depth(path: &Path) -> usize {
    path.components().count()
}

fn summarize_files(files: &[PathBuf]) -> String {
    let mut names: Vec<String> = files
        .iter()
        .take(MAX_LISTED_FILES)
        .map(|p| p.display().to_string())
        .collect();
    if files.len() > MAX_LISTED_FILES {
        names.push(format!("… +{} more", files.len() - MAX_LISTED_FILES));
    }
    if names.is_empty() {
        "nothing".to_string()
    } else {
        names.join(", ")
    }
}

/// Locate the shallowest directory that holds both a runtime manifest and a
/// resolvable entry point. Pure over the extracted file list, so it can be
/// exercised without touching disk.
pub fn discover_layout(files: &[PathBuf], runtime: Runtime) -> Result<BotLayout, HostError> {
    let manifests = manifest_names(runtime);

    let mut manifest_dirs: Vec<PathBuf> = files
        .iter()
        .filter(|p| file_name_matches(p, manifests).is_some())
        .map(|p| p.parent().unwrap_or(Path::new("")).to_path_buf())
        .collect();
    manifest_dirs.sort_by_key(|d| (depth(d), d.clone()));
    manifest_dirs.dedup();

    if manifest_dirs.is_empty() {
        return Err(HostError::ManifestNotFound {
            runtime: runtime.as_str(),
            found: summarize_files(files),
        });
    }

    for dir in &manifest_dirs {
        if let Some(entry) = find_entry_point(files, dir, runtime) {
            return Ok(BotLayout {
                bot_directory: dir.clone(),
                entry_point: entry,
            });
        }
    }

    Err(HostError::EntryPointNotFound {
        expected: preferred_entry_points(runtime).join(", "),
    })
}

fn find_entry_point(files: &[PathBuf], dir: &Path, runtime: Runtime) -> Option<PathBuf> {
    let preferred = preferred_entry_points(runtime);
    let in_dir: Vec<&PathBuf> = files
        .iter()
        .filter(|p| p.parent().unwrap_or(Path::new("")) == dir)
        .collect();

    // Preferred names first, in preference order.
    for &name in preferred {
        if let Some(p) = in_dir
            .iter()
            .find(|p| file_name_matches(p, &[name]).is_some())
        {
            return p.strip_prefix(dir).ok().map(Path::to_path_buf);
        }
    }

    // Any source file of the matching extension in the manifest directory.
    if let Some(p) = in_dir.iter().find(|p| has_source_extension(p, runtime)) {
        return p.strip_prefix(dir).ok().map(Path::to_path_buf);
    }

    // No entry beside the manifest: search the subtree, nearest level first,
    // preferred names before plain source files within a level.
    files
        .iter()
        .filter(|p| p.starts_with(dir) && p.parent().unwrap_or(Path::new("")) != dir)
        .filter_map(|p| {
            let rank = file_name_matches(p, preferred)
                .or_else(|| has_source_extension(p, runtime).then_some(preferred.len()))?;
            Some((depth(p), rank, p))
        })
        .min_by_key(|(d, rank, p)| (*d, *rank, (*p).clone()))
        .and_then(|(_, _, p)| p.strip_prefix(dir).ok().map(Path::to_path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(raw: &[&str]) -> Vec<PathBuf> {
        raw.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn zip_magic_is_detected() {
        assert!(archive_is_zip(b"PK\x03\x04rest"));
        assert!(archive_is_zip(b"PK\x05\x06"));
        assert!(!archive_is_zip(b"\x1f\x8b\x08\x00"));
        assert!(!archive_is_zip(b"PK"));
    }

    #[test]
    fn root_level_python_project_resolves() {
        let files = paths(&["requirements.txt", "main.py", "util.py"]);
        let layout = discover_layout(&files, Runtime::Python).unwrap();
        assert_eq!(layout.bot_directory, PathBuf::from(""));
        assert_eq!(layout.entry_point, PathBuf::from("main.py"));
    }

    #[test]
    fn node_manifest_does_not_satisfy_python_deploy() {
        let files = paths(&["package.json", "index.js"]);
        let err = discover_layout(&files, Runtime::Python).unwrap_err();
        match err {
            HostError::ManifestNotFound { runtime, found } => {
                assert_eq!(runtime, "python");
                assert!(found.contains("package.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn nested_project_is_found_at_its_manifest_directory() {
        let files = paths(&[
            "README.md",
            "my-bot/requirements.txt",
            "my-bot/bot.py",
            "my-bot/lib/helpers.py",
        ]);
        let layout = discover_layout(&files, Runtime::Python).unwrap();
        assert_eq!(layout.bot_directory, PathBuf::from("my-bot"));
        assert_eq!(layout.entry_point, PathBuf::from("bot.py"));
    }

    #[test]
    fn shallowest_manifest_directory_wins() {
        let files = paths(&[
            "requirements.txt",
            "main.py",
            "vendor/inner/requirements.txt",
            "vendor/inner/main.py",
        ]);
        let layout = discover_layout(&files, Runtime::Python).unwrap();
        assert_eq!(layout.bot_directory, PathBuf::from(""));
    }

    #[test]
    fn preferred_names_beat_other_sources() {
        let files = paths(&["package.json", "aaa.js", "index.js"]);
        let layout = discover_layout(&files, Runtime::Node).unwrap();
        assert_eq!(layout.entry_point, PathBuf::from("index.js"));
    }

    #[test]
    fn falls_back_to_first_matching_source_file() {
        let files = paths(&["requirements.txt", "runner.py", "zeta.py"]);
        let layout = discover_layout(&files, Runtime::Python).unwrap();
        assert_eq!(layout.entry_point, PathBuf::from("runner.py"));
    }

    #[test]
    fn entry_point_search_recurses_into_subdirectories() {
        let files = paths(&["pyproject.toml", "src/deep/main.py", "src/other.py"]);
        let layout = discover_layout(&files, Runtime::Python).unwrap();
        // Nearest level first: src/other.py is one level down, main.py two.
        assert_eq!(layout.entry_point, PathBuf::from("src/other.py"));
    }

    #[test]
    fn preferred_name_wins_within_a_level() {
        let files = paths(&["pyproject.toml", "src/alpha.py", "src/main.py"]);
        let layout = discover_layout(&files, Runtime::Python).unwrap();
        assert_eq!(layout.entry_point, PathBuf::from("src/main.py"));
    }

    #[test]
    fn manifest_without_any_entry_point_is_rejected() {
        let files = paths(&["requirements.txt", "README.md", "data/notes.txt"]);
        let err = discover_layout(&files, Runtime::Python).unwrap_err();
        assert!(matches!(err, HostError::EntryPointNotFound { .. }));
    }

    #[test]
    fn manifest_detection_is_case_insensitive() {
        let files = paths(&["Requirements.TXT", "bot.py"]);
        let layout = discover_layout(&files, Runtime::Python).unwrap();
        assert_eq!(layout.entry_point, PathBuf::from("bot.py"));
    }

    #[test]
    fn second_manifest_dir_is_used_when_first_has_no_entry() {
        let files = paths(&[
            "docs/requirements.txt",
            "docs/readme.md",
            "app/src/requirements.txt",
            "app/src/main.py",
        ]);
        let layout = discover_layout(&files, Runtime::Python).unwrap();
        assert_eq!(layout.bot_directory, PathBuf::from("app/src"));
        assert_eq!(layout.entry_point, PathBuf::from("main.py"));
    }
}
