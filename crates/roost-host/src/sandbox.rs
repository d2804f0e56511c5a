use std::path::{Component, Path, PathBuf};

use crate::error::HostError;

/// Lexical confinement of a caller-supplied relative path. No filesystem
/// access happens here; absolute paths, `..` and prefix components are all
/// rejected outright.
pub fn normalize_rel_path(rel: &str) -> Result<PathBuf, HostError> {
    if rel.is_empty() {
        return Ok(PathBuf::new());
    }

    let p = Path::new(rel);
    if p.is_absolute() {
        return Err(HostError::AccessDenied("path must be relative"));
    }

    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::Normal(seg) => out.push(seg),
            Component::ParentDir => {
                return Err(HostError::AccessDenied("path traversal is not allowed"));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(HostError::AccessDenied("path must be relative"));
            }
        }
    }

    Ok(out)
}

/// Confines all file operations for a bot to its assigned directory tree.
///
/// `resolve` is the lexical gate; `resolve_existing` additionally
/// canonicalizes and verifies the result is still a descendant of the root,
/// which catches escapes through symlink chains.
#[derive(Debug, Clone)]
pub struct SandboxRoot {
    root: PathBuf,
}

impl SandboxRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn canonical_root(&self) -> Result<PathBuf, HostError> {
        tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|_| HostError::FilesMissing)
    }

    /// Join a relative path under the root after lexical normalization.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf, HostError> {
        Ok(self.root.join(normalize_rel_path(rel)?))
    }

    /// Resolve a path that must already exist, following symlinks and
    /// verifying the canonical form never left the root.
    pub async fn resolve_existing(&self, rel: &str) -> Result<PathBuf, HostError> {
        let nominal = self.resolve(rel)?;
        let root = self.canonical_root().await?;
        let canon = tokio::fs::canonicalize(&nominal)
            .await
            .map_err(|_| HostError::NotFound("path"))?;
        if !canon.starts_with(&root) {
            return Err(HostError::AccessDenied("path escapes the bot directory"));
        }
        Ok(canon)
    }

    /// Create directories step-by-step, refusing to traverse symlinks.
    pub async fn mkdir_rel(&self, rel: &str, recursive: bool) -> Result<PathBuf, HostError> {
        let rel = normalize_rel_path(rel)?;
        let root = self.canonical_root().await?;

        let total = rel.components().count();
        let mut cur = root.clone();
        for (i, c) in rel.components().enumerate() {
            let seg = match c {
                Component::Normal(s) => s,
                Component::CurDir => continue,
                _ => return Err(HostError::AccessDenied("path traversal is not allowed")),
            };
            let next = cur.join(seg);
            match tokio::fs::symlink_metadata(&next).await {
                Ok(m) => {
                    if m.file_type().is_symlink() {
                        return Err(HostError::AccessDenied(
                            "symlinks are not allowed in directory paths",
                        ));
                    }
                    if !m.is_dir() {
                        return Err(HostError::Validation(
                            "path component is not a directory".to_string(),
                        ));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // If not recursive, only the leaf may be missing.
                    if !recursive && i + 1 != total {
                        return Err(HostError::NotFound("parent directory"));
                    }
                    tokio::fs::create_dir(&next)
                        .await
                        .map_err(|e| anyhow::anyhow!("failed to create directory: {e}"))?;
                }
                Err(e) => {
                    return Err(anyhow::anyhow!("failed to stat path: {e}").into());
                }
            }
            cur = next;
        }

        let canon = tokio::fs::canonicalize(&cur)
            .await
            .map_err(|e| anyhow::anyhow!("failed to canonicalize: {e}"))?;
        if !canon.starts_with(&root) {
            return Err(HostError::AccessDenied("path escapes the bot directory"));
        }
        Ok(canon)
    }

    /// Resolve (and create, if needed) the parent directory for a file write.
    pub async fn ensure_parent_dir(&self, rel: &str) -> Result<PathBuf, HostError> {
        let rel = normalize_rel_path(rel)?;
        let parent = rel.parent().unwrap_or(Path::new(""));
        self.mkdir_rel(&parent.to_string_lossy(), true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_access_denied(err: HostError) -> bool {
        matches!(err, HostError::AccessDenied(_))
    }

    #[test]
    fn normalize_accepts_plain_relative_paths() {
        assert_eq!(
            normalize_rel_path("src/main.py").unwrap(),
            PathBuf::from("src/main.py")
        );
        assert_eq!(normalize_rel_path("./a/./b").unwrap(), PathBuf::from("a/b"));
        assert_eq!(normalize_rel_path("").unwrap(), PathBuf::new());
    }

    #[test]
    fn normalize_rejects_traversal_and_absolute_paths() {
        assert!(is_access_denied(
            normalize_rel_path("../../etc/passwd").unwrap_err()
        ));
        assert!(is_access_denied(normalize_rel_path("a/../../b").unwrap_err()));
        assert!(is_access_denied(normalize_rel_path("/etc/passwd").unwrap_err()));
    }

    #[test]
    fn resolve_rejects_escapes_without_touching_disk() {
        // The root does not exist; a lexical rejection must happen first.
        let sandbox = SandboxRoot::new("/nonexistent/bot/dir");
        assert!(is_access_denied(
            sandbox.resolve("../../etc/passwd").unwrap_err()
        ));
    }

    #[tokio::test]
    async fn resolve_existing_allows_paths_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SandboxRoot::new(dir.path());
        tokio::fs::write(dir.path().join("bot.py"), b"print()").await.unwrap();

        let got = sandbox.resolve_existing("bot.py").await.unwrap();
        assert!(got.ends_with("bot.py"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_existing_rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        tokio::fs::write(outside.path().join("secret"), b"x").await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), dir.path().join("link"))
            .unwrap();

        let sandbox = SandboxRoot::new(dir.path());
        assert!(is_access_denied(
            sandbox.resolve_existing("link").await.unwrap_err()
        ));
    }

    #[tokio::test]
    async fn mkdir_rel_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SandboxRoot::new(dir.path());

        let created = sandbox.mkdir_rel("a/b/c", true).await.unwrap();
        assert!(created.is_dir());

        // Non-recursive creation requires the parent to exist already.
        let err = sandbox.mkdir_rel("x/y", false).await.unwrap_err();
        assert!(matches!(err, HostError::NotFound(_)));
    }
}
