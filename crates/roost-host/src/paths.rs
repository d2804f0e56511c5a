use std::path::PathBuf;

use uuid::Uuid;

pub const ARCHIVE_FILE: &str = "archive.zip";
pub const APP_DIR: &str = "app";

pub fn data_root() -> PathBuf {
    let raw = std::env::var("ROOST_DATA_ROOT").unwrap_or_else(|_| "./data".to_string());
    let p = PathBuf::from(raw);
    let abs = if p.is_absolute() {
        p
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(p)
    };

    // Best-effort canonicalization: don't fail if the directory doesn't exist yet.
    std::fs::canonicalize(&abs).unwrap_or(abs)
}

pub fn bots_root() -> PathBuf {
    data_root().join("bots")
}

/// Per-bot sandbox root. Everything a bot owns on disk lives under here.
pub fn bot_sandbox(bot_id: Uuid) -> PathBuf {
    bots_root().join(bot_id.to_string())
}

/// Keep bot names safe for logs and filesystem-adjacent display.
pub fn bot_name_is_valid(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

pub fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::bot_name_is_valid;

    #[test]
    fn bot_names_are_validated() {
        assert!(bot_name_is_valid("my-bot_01"));
        assert!(bot_name_is_valid("weather.bot"));
        assert!(!bot_name_is_valid(""));
        assert!(!bot_name_is_valid("bad name"));
        assert!(!bot_name_is_valid("../escape"));
        assert!(!bot_name_is_valid(&"x".repeat(65)));
    }
}
