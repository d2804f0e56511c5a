use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use roost_core::Runtime;
use tokio::process::Command;

use crate::error::HostError;

const OUTPUT_TAIL_BYTES: usize = 4096;

pub fn command_exists(bin: &str) -> bool {
    let path = Path::new(bin);
    if path.components().count() > 1 {
        return is_executable_file(path);
    }

    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| {
                let candidate = dir.join(bin);
                is_executable_file(&candidate)
            })
        })
        .unwrap_or(false)
}

fn is_executable_file(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        return meta.permissions().mode() & 0o111 != 0;
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// The bot's own interpreter, if a virtual environment was created for it.
pub fn venv_python(bot_dir: &Path) -> Option<PathBuf> {
    let p = bot_dir.join(".venv").join("bin").join("python");
    p.is_file().then_some(p)
}

fn output_tail(combined: &str) -> String {
    let trimmed = combined.trim();
    if trimmed.len() <= OUTPUT_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - OUTPUT_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &trimmed[start..])
}

/// Run an external tool, capturing combined stdout/stderr for diagnostics.
/// Non-zero exit maps to a dependency-install failure carrying the output.
async fn run_tool(
    program: impl AsRef<OsStr>,
    args: &[&str],
    cwd: &Path,
) -> Result<String, HostError> {
    let program = program.as_ref();
    let program_display = program.to_string_lossy().to_string();
    tracing::debug!(tool = %program_display, ?args, cwd = %cwd.display(), "running package tool");

    let out = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("failed to run {program_display}: {e}"))?;

    let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&out.stderr));

    if !out.status.success() {
        return Err(HostError::DependencyInstall {
            output: output_tail(&combined),
        });
    }
    Ok(combined)
}

async fn ensure_venv(bot_dir: &Path) -> Result<PathBuf, HostError> {
    if let Some(python) = venv_python(bot_dir) {
        return Ok(python);
    }
    run_tool("python3", &["-m", "venv", ".venv"], bot_dir).await?;
    venv_python(bot_dir).ok_or_else(|| HostError::DependencyInstall {
        output: "virtual environment was created but has no interpreter".to_string(),
    })
}

fn uses_uv_project(bot_dir: &Path) -> bool {
    bot_dir.join("uv.lock").is_file() || bot_dir.join("pyproject.toml").is_file()
}

/// Install the dependencies declared by a freshly extracted bot.
///
/// Python prefers `uv sync` when both the tool and a lock-file project are
/// present, and otherwise degrades to a per-bot virtual environment fed from
/// `requirements.txt`. The fallback behaves the same whether or not `uv`
/// exists on the host.
pub async fn install_dependencies(runtime: Runtime, bot_dir: &Path) -> Result<(), HostError> {
    match runtime {
        Runtime::Python => install_python(bot_dir).await,
        Runtime::Node => {
            run_tool("npm", &["install"], bot_dir).await?;
            Ok(())
        }
    }
}

async fn install_python(bot_dir: &Path) -> Result<(), HostError> {
    if uses_uv_project(bot_dir) && command_exists("uv") {
        run_tool("uv", &["sync"], bot_dir).await?;
        return Ok(());
    }

    if bot_dir.join("requirements.txt").is_file() {
        let python = ensure_venv(bot_dir).await?;
        run_tool(
            &python,
            &["-m", "pip", "install", "-r", "requirements.txt"],
            bot_dir,
        )
        .await?;
        return Ok(());
    }

    tracing::warn!(
        dir = %bot_dir.display(),
        "lock-file project but `uv` is not installed and no requirements.txt exists; skipping dependency install"
    );
    Ok(())
}

/// Package names are passed as single argv entries (never through a shell),
/// so this only needs to keep the manifest sane.
fn validate_package_name(package: &str) -> Result<&str, HostError> {
    let package = package.trim();
    if package.is_empty() || package.len() > 128 {
        return Err(HostError::Validation(
            "package name must be 1-128 characters".to_string(),
        ));
    }
    if !package
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '/' | '[' | ']'))
    {
        return Err(HostError::Validation(format!(
            "invalid package name: {package}"
        )));
    }
    Ok(package)
}

/// The distribution name of a requirements line: everything before any
/// extras, version specifier or comment.
fn requirement_name(line: &str) -> &str {
    let line = line.trim();
    let end = line
        .find(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | ';' | '[' | '#' | ' '))
        .unwrap_or(line.len());
    &line[..end]
}

fn add_requirement(contents: &str, package: &str) -> String {
    let name = requirement_name(package);
    if contents
        .lines()
        .any(|l| requirement_name(l).eq_ignore_ascii_case(name))
    {
        return contents.to_string();
    }
    let mut out = contents.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(package);
    out.push('\n');
    out
}

fn remove_requirement(contents: &str, package: &str) -> String {
    let name = requirement_name(package);
    let mut out = String::new();
    for line in contents.lines() {
        if requirement_name(line).eq_ignore_ascii_case(name) {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

async fn edit_requirements(
    bot_dir: &Path,
    edit: impl Fn(&str) -> String,
) -> Result<(), HostError> {
    let path = bot_dir.join("requirements.txt");
    let contents = tokio::fs::read_to_string(&path).await.unwrap_or_default();
    tokio::fs::write(&path, edit(&contents))
        .await
        .map_err(|e| anyhow::anyhow!("failed to update requirements.txt: {e}"))?;
    Ok(())
}

/// Post-deploy single-package install: append to the manifest, then invoke
/// the installer with the same environment selection as a full install.
pub async fn add_package(
    runtime: Runtime,
    bot_dir: &Path,
    package: &str,
) -> Result<String, HostError> {
    let package = validate_package_name(package)?;
    match runtime {
        Runtime::Python => {
            if bot_dir.join("uv.lock").is_file() && command_exists("uv") {
                return run_tool("uv", &["add", package], bot_dir).await;
            }
            edit_requirements(bot_dir, |c| add_requirement(c, package)).await?;
            let python = venv_python(bot_dir).unwrap_or_else(|| PathBuf::from("python3"));
            run_tool(&python, &["-m", "pip", "install", package], bot_dir).await
        }
        Runtime::Node => run_tool("npm", &["install", package], bot_dir).await,
    }
}

pub async fn remove_package(
    runtime: Runtime,
    bot_dir: &Path,
    package: &str,
) -> Result<String, HostError> {
    let package = validate_package_name(package)?;
    match runtime {
        Runtime::Python => {
            if bot_dir.join("uv.lock").is_file() && command_exists("uv") {
                return run_tool("uv", &["remove", package], bot_dir).await;
            }
            edit_requirements(bot_dir, |c| remove_requirement(c, package)).await?;
            let python = venv_python(bot_dir).unwrap_or_else(|| PathBuf::from("python3"));
            run_tool(&python, &["-m", "pip", "uninstall", "-y", package], bot_dir).await
        }
        Runtime::Node => run_tool("npm", &["uninstall", package], bot_dir).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_names_ignore_specifiers() {
        assert_eq!(requirement_name("requests==2.31.0"), "requests");
        assert_eq!(requirement_name("aiohttp>=3.9"), "aiohttp");
        assert_eq!(requirement_name("uvicorn[standard]"), "uvicorn");
        assert_eq!(requirement_name("  flask  # web"), "flask");
        assert_eq!(requirement_name("plain"), "plain");
    }

    #[test]
    fn add_requirement_appends_once() {
        let once = add_requirement("requests==2.31.0\n", "httpx");
        assert_eq!(once, "requests==2.31.0\nhttpx\n");
        // A second add of the same name is a no-op.
        assert_eq!(add_requirement(&once, "httpx==0.27"), once);
        // Missing trailing newline is repaired.
        assert_eq!(add_requirement("requests", "httpx"), "requests\nhttpx\n");
    }

    #[test]
    fn remove_requirement_matches_by_name() {
        let contents = "requests==2.31.0\nhttpx\nflask>=3\n";
        assert_eq!(remove_requirement(contents, "httpx"), "requests==2.31.0\nflask>=3\n");
        assert_eq!(remove_requirement(contents, "HTTPX==9"), "requests==2.31.0\nflask>=3\n");
        assert_eq!(remove_requirement(contents, "absent"), contents);
    }

    #[test]
    fn package_names_are_validated() {
        assert!(validate_package_name("requests").is_ok());
        assert!(validate_package_name("@scope/pkg").is_ok());
        assert!(validate_package_name("uvicorn[standard]").is_ok());
        assert!(validate_package_name("").is_err());
        assert!(validate_package_name("bad name").is_err());
        assert!(validate_package_name("pkg; rm -rf /").is_err());
    }

    #[test]
    fn output_tail_keeps_the_end() {
        let long = "a".repeat(OUTPUT_TAIL_BYTES + 100);
        let tail = output_tail(&long);
        assert!(tail.len() <= OUTPUT_TAIL_BYTES + '…'.len_utf8());
        assert!(tail.starts_with('…'));
        assert_eq!(output_tail("short"), "short");
    }
}
