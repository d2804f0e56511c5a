use std::io;
use std::path::PathBuf;

use futures_util::future::BoxFuture;
use tokio::io::AsyncRead;
use tokio::process::Command;

/// Everything needed to launch one bot process: resolved interpreter, entry
/// argument, working directory and the bot's stored environment (applied on
/// top of the inherited process environment, so bot keys win on collision).
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

/// A spawned child, reduced to what the supervisor needs: output streams to
/// pump, an exit future to await, and a way to signal the process tree.
pub struct LaunchedProcess {
    pub pid: Option<u32>,
    pub stdout: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
    /// Resolves with the exit code (None when killed by a signal).
    pub exit: BoxFuture<'static, io::Result<Option<i32>>>,
    pub signal: Box<dyn Fn(Signal) + Send + Sync>,
}

/// Seam between the supervisor and the OS, so lifecycle logic can be tested
/// without real subprocesses.
pub trait ProcessLauncher: Send + Sync + 'static {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<LaunchedProcess>;
}

#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> io::Result<()> {
    // If the orchestrator dies (crash/kill), ensure the child is terminated.
    // NOTE: `unsafe fn` bodies are not implicitly unsafe in Rust 2024.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
unsafe fn set_parent_death_signal() -> io::Result<()> {
    Ok(())
}

/// The real launcher: tokio `Command` with piped stdio, its own session so
/// the whole process tree can be signalled at once.
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<LaunchedProcess> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| {
                    set_parent_death_signal()?;
                    if libc::setsid() == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let pgid = pid.map(|p| p as i32);

        let stdout = child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>);
        let stderr = child
            .stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>);

        let exit: BoxFuture<'static, io::Result<Option<i32>>> = Box::pin(async move {
            let status = child.wait().await?;
            Ok(status.code())
        });

        let signal: Box<dyn Fn(Signal) + Send + Sync> = Box::new(move |sig| {
            #[cfg(unix)]
            {
                if let Some(pgid) = pgid {
                    let signo = match sig {
                        Signal::Terminate => libc::SIGTERM,
                        Signal::Kill => libc::SIGKILL,
                    };
                    unsafe {
                        libc::kill(-pgid, signo);
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let _ = (sig, pgid);
            }
        });

        Ok(LaunchedProcess {
            pid,
            stdout,
            stderr,
            exit,
            signal,
        })
    }
}
