use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use roost_core::{BotState, ResourceUsage, Runtime};
use roost_db::entities::{bots, environment_variables as env_vars, users};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::archive;
use crate::broadcast::LogBroadcaster;
use crate::error::HostError;
use crate::installer;
use crate::launcher::LaunchSpec;
use crate::paths::{self, env_u64};
use crate::supervisor::{self, BotExit, BotSupervisor};

const TIER_FREE: &str = "FREE";
const TIER_PREMIUM: &str = "PREMIUM";

fn max_archive_bytes() -> u64 {
    env_u64("ROOST_MAX_ARCHIVE_BYTES")
        .map(|v| v.clamp(1024 * 1024, 1024 * 1024 * 1024))
        .unwrap_or(64 * 1024 * 1024)
}

fn restart_settle_delay() -> Duration {
    Duration::from_millis(
        env_u64("ROOST_RESTART_SETTLE_MS")
            .map(|v| v.clamp(0, 10_000))
            .unwrap_or(1000),
    )
}

#[derive(Clone, Copy, Debug)]
struct RestartConfig {
    max_retries: u32,
    backoff_ms: u64,
    backoff_max_ms: u64,
}

fn restart_config() -> RestartConfig {
    let backoff_ms = env_u64("ROOST_RESTART_BACKOFF_MS")
        .map(|v| v.clamp(100, 10 * 60 * 1000))
        .unwrap_or(1000);
    let backoff_max_ms = env_u64("ROOST_RESTART_BACKOFF_MAX_MS")
        .map(|v| v.clamp(backoff_ms, 60 * 60 * 1000))
        .unwrap_or(30_000);
    let max_retries = env_u64("ROOST_RESTART_MAX_RETRIES")
        .map(|v| v.clamp(0, 1000) as u32)
        .unwrap_or(10);

    RestartConfig {
        max_retries,
        backoff_ms,
        backoff_max_ms,
    }
}

fn compute_backoff_ms(cfg: RestartConfig, attempt: u32) -> u64 {
    // attempt is 1-based.
    let pow = attempt.saturating_sub(1).min(30);
    let mult = 1u64.checked_shl(pow).unwrap_or(u64::MAX);
    cfg.backoff_ms.saturating_mul(mult).min(cfg.backoff_max_ms)
}

enum ErrorUpdate {
    Keep,
    Clear,
    Set(String),
}

/// A bot row paired with what the supervisor currently knows about it.
#[derive(Debug, Clone)]
pub struct BotSnapshot {
    pub model: bots::Model,
    pub pid: Option<u32>,
}

/// Build the launch command for a deployed bot: the bot's own virtual
/// environment interpreter when one exists, else the host runtime; run from
/// the entry point's containing directory with the stored env vars applied
/// over the ambient environment.
fn launch_spec(
    runtime: Runtime,
    bot_directory: &Path,
    entry_point: &Path,
    env: Vec<(String, String)>,
) -> Result<LaunchSpec, HostError> {
    let entry_name = entry_point
        .file_name()
        .ok_or_else(|| HostError::Validation("invalid entry point".to_string()))?;
    let cwd = match entry_point.parent() {
        Some(p) if !p.as_os_str().is_empty() => bot_directory.join(p),
        _ => bot_directory.to_path_buf(),
    };
    let command = match runtime {
        Runtime::Python => {
            installer::venv_python(bot_directory).unwrap_or_else(|| PathBuf::from("python3"))
        }
        Runtime::Node => PathBuf::from("node"),
    };

    Ok(LaunchSpec {
        command,
        args: vec![entry_name.to_string_lossy().into_owned()],
        cwd,
        env,
    })
}

#[derive(Debug, serde::Serialize)]
struct RunInfo {
    bot_id: String,
    exec: String,
    args: Vec<String>,
    cwd: String,
    started_at_unix_ms: u64,
    host_version: String,
    // Values are secrets; only record which keys were injected.
    env_keys: Vec<String>,
}

async fn write_run_info(dir: &Path, bot_id: Uuid, spec: &LaunchSpec) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let info = RunInfo {
        bot_id: bot_id.to_string(),
        exec: spec.command.display().to_string(),
        args: spec.args.clone(),
        cwd: spec.cwd.display().to_string(),
        started_at_unix_ms: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64,
        host_version: env!("CARGO_PKG_VERSION").to_string(),
        env_keys: spec.env.iter().map(|(k, _)| k.clone()).collect(),
    };

    let path = dir.join("run.json");
    let tmp = dir.join("run.json.tmp");
    let data = serde_json::to_vec_pretty(&info)?;
    let mut f = tokio::fs::File::create(&tmp).await?;
    f.write_all(&data).await?;
    f.flush().await.ok();
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

/// Coordinates the database, the on-disk sandboxes and the supervisor. One
/// instance per orchestrator process; cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    db: Arc<DatabaseConnection>,
    supervisor: BotSupervisor,
    broadcaster: LogBroadcaster,
    restart_attempts: Arc<Mutex<HashMap<Uuid, u32>>>,
}

impl Orchestrator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        supervisor: BotSupervisor,
        broadcaster: LogBroadcaster,
    ) -> Self {
        Self {
            db,
            supervisor,
            broadcaster,
            restart_attempts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn broadcaster(&self) -> &LogBroadcaster {
        &self.broadcaster
    }

    async fn load_bot(&self, bot_id: Uuid) -> Result<bots::Model, HostError> {
        bots::Entity::find_by_id(bot_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(HostError::NotFound("bot"))
    }

    async fn update_status(
        &self,
        bot_id: Uuid,
        state: BotState,
        error: ErrorUpdate,
    ) -> Result<bots::Model, HostError> {
        let bot = self.load_bot(bot_id).await?;
        let mut active: bots::ActiveModel = bot.into();
        active.status = Set(state.as_str().to_string());
        match error {
            ErrorUpdate::Keep => {}
            ErrorUpdate::Clear => active.error_message = Set(None),
            ErrorUpdate::Set(msg) => active.error_message = Set(Some(msg)),
        }
        active.updated_at = Set(chrono::Utc::now().into());
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// The deploy pipeline: validate, gate on tier usage, persist the
    /// archive, extract, discover the project layout, record the bot, install
    /// dependencies. Every failure tears the sandbox back down and leaves no
    /// bot row behind.
    pub async fn deploy(
        &self,
        user_id: Uuid,
        name: &str,
        runtime: Runtime,
        archive_bytes: &[u8],
        env: Vec<(String, String)>,
    ) -> Result<bots::Model, HostError> {
        if !paths::bot_name_is_valid(name) {
            return Err(HostError::Validation(
                "bot name must be 1-64 characters of letters, digits, '-', '_' or '.'".to_string(),
            ));
        }
        if archive_bytes.is_empty() {
            return Err(HostError::Validation("archive must not be empty".to_string()));
        }
        if archive_bytes.len() as u64 > max_archive_bytes() {
            return Err(HostError::Validation(format!(
                "archive exceeds the {} byte limit",
                max_archive_bytes()
            )));
        }
        if !archive::archive_is_zip(archive_bytes) {
            return Err(HostError::Validation(
                "archive must be a zip file".to_string(),
            ));
        }
        for (key, _) in &env {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(HostError::Validation(format!(
                    "invalid environment variable key: {key:?}"
                )));
            }
        }

        let user = users::Entity::find_by_id(user_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(HostError::NotFound("user"))?;
        if user.tier == TIER_FREE && user.usage_count >= user.usage_limit {
            return Err(HostError::Validation(format!(
                "deploy limit reached ({}/{})",
                user.usage_count, user.usage_limit
            )));
        }

        if bots::Entity::find()
            .filter(bots::Column::UserId.eq(user_id))
            .filter(bots::Column::Name.eq(name))
            .one(self.db.as_ref())
            .await?
            .is_some()
        {
            return Err(HostError::Validation(format!(
                "a bot named {name:?} already exists"
            )));
        }

        let bot_id = Uuid::new_v4();
        let sandbox_dir = paths::bot_sandbox(bot_id);
        let archive_path = sandbox_dir.join(paths::ARCHIVE_FILE);
        let extract_root = sandbox_dir.join(paths::APP_DIR);

        let layout = match self
            .ingest_archive(&sandbox_dir, &archive_path, &extract_root, archive_bytes, runtime)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&sandbox_dir).await;
                return Err(e);
            }
        };

        let bot_directory = extract_root.join(&layout.bot_directory);
        let bot_directory = tokio::fs::canonicalize(&bot_directory)
            .await
            .unwrap_or(bot_directory);

        tracing::info!(
            bot_id = %bot_id,
            runtime = runtime.as_str(),
            bot_directory = %bot_directory.display(),
            entry_point = %layout.entry_point.display(),
            "archive validated"
        );

        let now = chrono::Utc::now();
        bots::ActiveModel {
            id: Set(bot_id),
            user_id: Set(user_id),
            name: Set(name.to_string()),
            runtime: Set(runtime.as_str().to_string()),
            status: Set(BotState::Installing.as_str().to_string()),
            zip_archive_path: Set(Some(archive_path.display().to_string())),
            bot_directory: Set(Some(bot_directory.display().to_string())),
            entry_point: Set(Some(layout.entry_point.display().to_string())),
            error_message: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db.as_ref())
        .await?;

        for (key, value) in env {
            env_vars::ActiveModel {
                id: Set(Uuid::new_v4()),
                bot_id: Set(bot_id),
                key: Set(key),
                value: Set(value),
                created_at: Set(chrono::Utc::now().into()),
            }
            .insert(self.db.as_ref())
            .await?;
        }

        if let Err(e) = installer::install_dependencies(runtime, &bot_directory).await {
            // Roll the whole deploy back: no row, no files.
            let _ = bots::Entity::delete_by_id(bot_id).exec(self.db.as_ref()).await;
            let _ = tokio::fs::remove_dir_all(&sandbox_dir).await;
            return Err(e);
        }

        let bot = self
            .update_status(bot_id, BotState::Stopped, ErrorUpdate::Clear)
            .await?;

        if user.tier == TIER_FREE {
            let next = user.usage_count + 1;
            let mut active: users::ActiveModel = user.into();
            active.usage_count = Set(next);
            active.updated_at = Set(chrono::Utc::now().into());
            active.update(self.db.as_ref()).await?;
        }

        tracing::info!(bot_id = %bot_id, "deploy complete");
        Ok(bot)
    }

    async fn ingest_archive(
        &self,
        sandbox_dir: &Path,
        archive_path: &Path,
        extract_root: &Path,
        archive_bytes: &[u8],
        runtime: Runtime,
    ) -> Result<archive::BotLayout, HostError> {
        tokio::fs::create_dir_all(sandbox_dir)
            .await
            .map_err(|e| anyhow::anyhow!("failed to create sandbox directory: {e}"))?;
        tokio::fs::write(archive_path, archive_bytes)
            .await
            .map_err(|e| anyhow::anyhow!("failed to persist archive: {e}"))?;

        archive::extract_zip_safely(archive_path, extract_root)
            .map_err(|e| HostError::Validation(format!("failed to extract archive: {e}")))?;

        let files = archive::collect_files(extract_root);
        let layout = archive::discover_layout(&files, runtime)?;

        // The resolved entry point must sit inside the manifest directory.
        let entry_abs = extract_root
            .join(&layout.bot_directory)
            .join(&layout.entry_point);
        let dir_canon = tokio::fs::canonicalize(extract_root.join(&layout.bot_directory))
            .await
            .map_err(|e| anyhow::anyhow!("failed to canonicalize bot directory: {e}"))?;
        let entry_canon = tokio::fs::canonicalize(&entry_abs)
            .await
            .map_err(|e| anyhow::anyhow!("failed to canonicalize entry point: {e}"))?;
        if !entry_canon.starts_with(&dir_canon) {
            return Err(HostError::AccessDenied(
                "entry point escapes the bot directory",
            ));
        }

        Ok(layout)
    }

    pub async fn get_bot(&self, bot_id: Uuid) -> Result<BotSnapshot, HostError> {
        let model = self.load_bot(bot_id).await?;
        let pid = self
            .supervisor
            .status(bot_id)
            .await
            .and_then(|(_, pid)| pid);
        Ok(BotSnapshot { model, pid })
    }

    pub async fn list_bots(&self, user_id: Uuid) -> Result<Vec<BotSnapshot>, HostError> {
        let models = bots::Entity::find()
            .filter(bots::Column::UserId.eq(user_id))
            .order_by_asc(bots::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;

        let mut out = Vec::with_capacity(models.len());
        for model in models {
            let pid = self
                .supervisor
                .status(model.id)
                .await
                .and_then(|(_, pid)| pid);
            out.push(BotSnapshot { model, pid });
        }
        Ok(out)
    }

    /// Manual start. Resets the auto-restart budget.
    pub async fn start(&self, bot_id: Uuid) -> Result<bots::Model, HostError> {
        self.restart_attempts.lock().await.remove(&bot_id);
        self.start_inner(bot_id).await
    }

    async fn start_inner(&self, bot_id: Uuid) -> Result<bots::Model, HostError> {
        let bot = self.load_bot(bot_id).await?;
        if self.supervisor.is_active(bot_id).await {
            return Err(HostError::AlreadyRunning);
        }

        let runtime = Runtime::parse(&bot.runtime)
            .ok_or_else(|| HostError::Validation(format!("unknown runtime: {}", bot.runtime)))?;

        // Fail fast if the deployed tree is gone; the status is deliberately
        // left untouched so the caller sees the prior resting state.
        let bot_directory = PathBuf::from(bot.bot_directory.clone().ok_or(HostError::FilesMissing)?);
        if !bot_directory.is_dir() {
            return Err(HostError::FilesMissing);
        }
        let entry_point = PathBuf::from(bot.entry_point.clone().ok_or(HostError::FilesMissing)?);
        let entry_abs = bot_directory.join(&entry_point);
        if !entry_abs.is_file() {
            return Err(HostError::FilesMissing);
        }
        let dir_canon = tokio::fs::canonicalize(&bot_directory)
            .await
            .map_err(|_| HostError::FilesMissing)?;
        let entry_canon = tokio::fs::canonicalize(&entry_abs)
            .await
            .map_err(|_| HostError::FilesMissing)?;
        if !entry_canon.starts_with(&dir_canon) {
            return Err(HostError::AccessDenied(
                "entry point escapes the bot directory",
            ));
        }

        let vars = env_vars::Entity::find()
            .filter(env_vars::Column::BotId.eq(bot_id))
            .all(self.db.as_ref())
            .await?;
        let env: Vec<(String, String)> = vars.into_iter().map(|v| (v.key, v.value)).collect();

        let spec = launch_spec(runtime, &bot_directory, &entry_point, env)?;
        self.update_status(bot_id, BotState::Starting, ErrorUpdate::Keep)
            .await?;
        if let Err(e) = write_run_info(&paths::bot_sandbox(bot_id), bot_id, &spec).await {
            tracing::debug!(bot_id = %bot_id, error = %e, "failed to write run.json");
        }

        tracing::info!(
            bot_id = %bot_id,
            exec = %spec.command.display(),
            cwd = %spec.cwd.display(),
            "starting bot"
        );

        match self.supervisor.start(bot_id, spec).await {
            Ok(_pid) => {
                self.update_status(bot_id, BotState::Running, ErrorUpdate::Clear)
                    .await
            }
            Err(e) => {
                // Deploy already succeeded, so the failure is recorded on the
                // bot where the owner can see it.
                let _ = self
                    .update_status(bot_id, BotState::Error, ErrorUpdate::Set(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Idempotent stop: the bot ends up `stopped` whether or not a live
    /// handle existed.
    pub async fn stop(&self, bot_id: Uuid) -> Result<bots::Model, HostError> {
        self.restart_attempts.lock().await.remove(&bot_id);
        self.load_bot(bot_id).await?;
        self.supervisor
            .stop(bot_id, supervisor::stop_timeout())
            .await?;
        self.update_status(bot_id, BotState::Stopped, ErrorUpdate::Keep)
            .await
    }

    /// Stop (when running), settle briefly, then start. A failure surfaces on
    /// the bot as `error` with the causing message.
    pub async fn restart(&self, bot_id: Uuid) -> Result<bots::Model, HostError> {
        self.restart_attempts.lock().await.remove(&bot_id);
        self.load_bot(bot_id).await?;

        if self.supervisor.is_active(bot_id).await {
            self.supervisor
                .stop(bot_id, supervisor::stop_timeout())
                .await?;
            self.update_status(bot_id, BotState::Stopped, ErrorUpdate::Keep)
                .await?;
        }

        tokio::time::sleep(restart_settle_delay()).await;

        match self.start_inner(bot_id).await {
            Ok(bot) => Ok(bot),
            Err(e) => {
                let _ = self
                    .update_status(bot_id, BotState::Error, ErrorUpdate::Set(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Tear the bot down completely: process, observers, on-disk sandbox,
    /// database row (env vars cascade).
    pub async fn delete(&self, bot_id: Uuid) -> Result<(), HostError> {
        self.load_bot(bot_id).await?;
        self.restart_attempts.lock().await.remove(&bot_id);
        let _ = self
            .supervisor
            .stop(bot_id, supervisor::stop_timeout())
            .await;
        self.broadcaster.drop_bot(bot_id).await;

        let sandbox_dir = paths::bot_sandbox(bot_id);
        if let Err(e) = tokio::fs::remove_dir_all(&sandbox_dir).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(bot_id = %bot_id, error = %e, "failed to remove bot sandbox");
        }

        bots::Entity::delete_by_id(bot_id)
            .exec(self.db.as_ref())
            .await?;
        tracing::info!(bot_id = %bot_id, "bot deleted");
        Ok(())
    }

    pub async fn set_env_var(
        &self,
        bot_id: Uuid,
        key: &str,
        value: &str,
    ) -> Result<(), HostError> {
        if key.is_empty() || key.len() > 128 || key.contains('=') || key.contains('\0') {
            return Err(HostError::Validation(format!(
                "invalid environment variable key: {key:?}"
            )));
        }
        self.load_bot(bot_id).await?;

        let existing = env_vars::Entity::find()
            .filter(env_vars::Column::BotId.eq(bot_id))
            .filter(env_vars::Column::Key.eq(key))
            .one(self.db.as_ref())
            .await?;

        match existing {
            Some(row) => {
                let mut active: env_vars::ActiveModel = row.into();
                active.value = Set(value.to_string());
                active.update(self.db.as_ref()).await?;
            }
            None => {
                env_vars::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    bot_id: Set(bot_id),
                    key: Set(key.to_string()),
                    value: Set(value.to_string()),
                    created_at: Set(chrono::Utc::now().into()),
                }
                .insert(self.db.as_ref())
                .await?;
            }
        }
        Ok(())
    }

    pub async fn delete_env_var(&self, bot_id: Uuid, key: &str) -> Result<(), HostError> {
        self.load_bot(bot_id).await?;
        let res = env_vars::Entity::delete_many()
            .filter(env_vars::Column::BotId.eq(bot_id))
            .filter(env_vars::Column::Key.eq(key))
            .exec(self.db.as_ref())
            .await?;
        if res.rows_affected == 0 {
            return Err(HostError::NotFound("environment variable"));
        }
        Ok(())
    }

    pub async fn list_env_vars(&self, bot_id: Uuid) -> Result<Vec<env_vars::Model>, HostError> {
        self.load_bot(bot_id).await?;
        Ok(env_vars::Entity::find()
            .filter(env_vars::Column::BotId.eq(bot_id))
            .order_by_asc(env_vars::Column::Key)
            .all(self.db.as_ref())
            .await?)
    }

    async fn bot_runtime_dir(&self, bot_id: Uuid) -> Result<(Runtime, PathBuf), HostError> {
        let bot = self.load_bot(bot_id).await?;
        let runtime = Runtime::parse(&bot.runtime)
            .ok_or_else(|| HostError::Validation(format!("unknown runtime: {}", bot.runtime)))?;
        let dir = PathBuf::from(bot.bot_directory.ok_or(HostError::FilesMissing)?);
        if !dir.is_dir() {
            return Err(HostError::FilesMissing);
        }
        Ok((runtime, dir))
    }

    pub async fn add_package(&self, bot_id: Uuid, package: &str) -> Result<String, HostError> {
        let (runtime, dir) = self.bot_runtime_dir(bot_id).await?;
        installer::add_package(runtime, &dir, package).await
    }

    pub async fn remove_package(&self, bot_id: Uuid, package: &str) -> Result<String, HostError> {
        let (runtime, dir) = self.bot_runtime_dir(bot_id).await?;
        installer::remove_package(runtime, &dir, package).await
    }

    pub async fn stats(&self, bot_id: Uuid) -> Result<(bool, Option<ResourceUsage>), HostError> {
        self.load_bot(bot_id).await?;
        let running = self.supervisor.is_active(bot_id).await;
        Ok((running, self.supervisor.resources(bot_id).await))
    }

    /// Consume supervisor exit events: persist the final state and schedule
    /// auto-restarts for eligible owners.
    pub fn spawn_exit_listener(&self, mut rx: mpsc::UnboundedReceiver<BotExit>) {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(exit) = rx.recv().await {
                this.handle_exit(exit).await;
            }
        });
    }

    async fn handle_exit(&self, exit: BotExit) {
        let BotExit {
            bot_id,
            exit_code,
            stopping,
            error,
        } = exit;

        // A newer process already took the id (e.g. a restart won the race);
        // this exit belongs to a previous generation.
        if self.supervisor.is_active(bot_id).await {
            return;
        }

        let failed = error.is_some() || exit_code.is_some_and(|c| c != 0);
        let update = if stopping || !failed {
            self.update_status(bot_id, BotState::Stopped, ErrorUpdate::Keep)
                .await
        } else {
            let msg = error
                .unwrap_or_else(|| format!("exited with code {}", exit_code.unwrap_or_default()));
            tracing::warn!(bot_id = %bot_id, %msg, "bot exited abnormally");
            self.update_status(bot_id, BotState::Error, ErrorUpdate::Set(msg))
                .await
        };
        let Ok(bot) = update else {
            // The bot row is gone (deleted while exiting); nothing to do.
            return;
        };

        if stopping || !failed {
            return;
        }

        let owner = match users::Entity::find_by_id(bot.user_id)
            .one(self.db.as_ref())
            .await
        {
            Ok(Some(u)) => u,
            _ => return,
        };
        if owner.tier != TIER_PREMIUM || !owner.auto_restart {
            return;
        }

        let cfg = restart_config();
        let attempt = {
            let mut attempts = self.restart_attempts.lock().await;
            let a = attempts.entry(bot_id).or_insert(0);
            if *a >= cfg.max_retries {
                tracing::warn!(bot_id = %bot_id, "auto-restart budget exhausted");
                return;
            }
            *a += 1;
            *a
        };

        let delay = Duration::from_millis(compute_backoff_ms(cfg, attempt));
        tracing::info!(
            bot_id = %bot_id,
            attempt,
            max = cfg.max_retries,
            delay_ms = delay.as_millis() as u64,
            "auto-restart scheduled"
        );

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = this.start_inner(bot_id).await {
                tracing::warn!(bot_id = %bot_id, error = %e, "auto-restart failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_up_to_the_cap() {
        let cfg = RestartConfig {
            max_retries: 10,
            backoff_ms: 1000,
            backoff_max_ms: 30_000,
        };
        assert_eq!(compute_backoff_ms(cfg, 1), 1000);
        assert_eq!(compute_backoff_ms(cfg, 2), 2000);
        assert_eq!(compute_backoff_ms(cfg, 3), 4000);
        assert_eq!(compute_backoff_ms(cfg, 6), 30_000);
        // Stays capped no matter how far the attempt counter runs.
        assert_eq!(compute_backoff_ms(cfg, 40), 30_000);
    }

    #[test]
    fn launch_spec_prefers_the_entry_directory_as_cwd() {
        let spec = launch_spec(
            Runtime::Python,
            Path::new("/data/bots/x/app"),
            Path::new("src/main.py"),
            Vec::new(),
        )
        .unwrap();
        assert_eq!(spec.cwd, PathBuf::from("/data/bots/x/app/src"));
        assert_eq!(spec.args, vec!["main.py".to_string()]);
        // No venv on this fake path, so the host interpreter is used.
        assert_eq!(spec.command, PathBuf::from("python3"));
    }

    #[test]
    fn launch_spec_for_root_entry_runs_in_the_bot_directory() {
        let spec = launch_spec(
            Runtime::Node,
            Path::new("/data/bots/x/app"),
            Path::new("index.js"),
            vec![("TOKEN".to_string(), "t".to_string())],
        )
        .unwrap();
        assert_eq!(spec.cwd, PathBuf::from("/data/bots/x/app"));
        assert_eq!(spec.command, PathBuf::from("node"));
        assert_eq!(spec.env.len(), 1);
    }
}
