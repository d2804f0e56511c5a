use roost_proto::host_v1::filesystem_service_server::{FilesystemService, FilesystemServiceServer};
use roost_proto::host_v1::{
    DirEntry, ListDirRequest, ListDirResponse, MkdirRequest, MkdirResponse, ReadFileRequest,
    ReadFileResponse, RemoveRequest, RemoveResponse, RenameRequest, RenameResponse,
    UploadFileRequest, UploadFileResponse, WriteFileRequest, WriteFileResponse,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::orchestrator::Orchestrator;
use crate::sandbox::{SandboxRoot, normalize_rel_path};

const DEFAULT_READ_LIMIT: u64 = 64 * 1024;
const MAX_READ_LIMIT: u64 = 1024 * 1024;
const MAX_WRITE_LIMIT: usize = 1024 * 1024;

#[derive(Clone)]
pub struct FilesystemApi {
    orchestrator: Orchestrator,
}

impl FilesystemApi {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Every operation resolves the bot first and confines itself to the
    /// bot's deployed source tree.
    async fn sandbox(&self, raw_bot_id: &str) -> Result<SandboxRoot, Status> {
        let bot_id: Uuid = raw_bot_id
            .trim()
            .parse()
            .map_err(|_| Status::invalid_argument("invalid bot_id"))?;
        let snap = self
            .orchestrator
            .get_bot(bot_id)
            .await
            .map_err(Status::from)?;
        let dir = snap
            .model
            .bot_directory
            .ok_or_else(|| Status::failed_precondition("bot has no deployed files"))?;
        Ok(SandboxRoot::new(dir))
    }
}

fn modified_unix_ms(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

async fn write_file_checked(
    sandbox: &SandboxRoot,
    rel: &str,
    data: &[u8],
) -> Result<(), Status> {
    if data.len() > MAX_WRITE_LIMIT {
        return Err(Status::invalid_argument("file too large"));
    }

    // File creation makes missing parent directories on the way.
    let parent = sandbox.ensure_parent_dir(rel).await.map_err(Status::from)?;
    let rel = normalize_rel_path(rel).map_err(Status::from)?;
    let file_name = rel
        .file_name()
        .ok_or_else(|| Status::invalid_argument("path must include a filename"))?;
    let path = parent.join(file_name);

    if let Ok(m) = tokio::fs::symlink_metadata(&path).await {
        if m.file_type().is_symlink() {
            return Err(Status::invalid_argument("refusing to write to a symlink"));
        }
        if m.is_dir() {
            return Err(Status::invalid_argument("path is a directory"));
        }
    }

    let tmp = path.with_extension("tmp");
    let mut f = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| Status::internal(format!("failed to write temp file: {e}")))?;
    f.write_all(data)
        .await
        .map_err(|e| Status::internal(format!("failed to write: {e}")))?;
    f.flush().await.ok();
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| Status::internal(format!("failed to persist file: {e}")))?;
    Ok(())
}

#[tonic::async_trait]
impl FilesystemService for FilesystemApi {
    async fn list_dir(
        &self,
        request: Request<ListDirRequest>,
    ) -> Result<Response<ListDirResponse>, Status> {
        let req = request.into_inner();
        let sandbox = self.sandbox(&req.bot_id).await?;
        let dir = sandbox
            .resolve_existing(&req.path)
            .await
            .map_err(Status::from)?;

        let meta = tokio::fs::metadata(&dir)
            .await
            .map_err(|_| Status::not_found("path not found"))?;
        if !meta.is_dir() {
            return Err(Status::invalid_argument("path is not a directory"));
        }

        let mut entries = Vec::new();
        let mut rd = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Status::internal(format!("failed to read dir: {e}")))?;
        while let Some(de) = rd
            .next_entry()
            .await
            .map_err(|e| Status::internal(format!("failed to read dir entry: {e}")))?
        {
            let name = de.file_name().to_string_lossy().to_string();
            let m = de
                .metadata()
                .await
                .map_err(|e| Status::internal(format!("failed to stat dir entry: {e}")))?;
            entries.push(DirEntry {
                name,
                is_dir: m.is_dir(),
                size_bytes: if m.is_file() { m.len() } else { 0 },
                modified_unix_ms: modified_unix_ms(&m),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Response::new(ListDirResponse { entries }))
    }

    async fn read_file(
        &self,
        request: Request<ReadFileRequest>,
    ) -> Result<Response<ReadFileResponse>, Status> {
        let req = request.into_inner();
        let sandbox = self.sandbox(&req.bot_id).await?;
        let path = sandbox
            .resolve_existing(&req.path)
            .await
            .map_err(Status::from)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| Status::not_found("path not found"))?;
        if !meta.is_file() {
            return Err(Status::invalid_argument("path is not a file"));
        }

        let size = meta.len();
        let offset = req.offset;
        if offset > size {
            return Err(Status::invalid_argument("offset out of range"));
        }

        let mut limit = req.limit;
        if limit == 0 {
            limit = DEFAULT_READ_LIMIT;
        }
        limit = limit.min(MAX_READ_LIMIT);

        let remaining = size - offset;
        let to_read = std::cmp::min(remaining, limit) as usize;

        let mut f = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Status::internal(format!("failed to open file: {e}")))?;
        f.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| Status::internal(format!("failed to seek: {e}")))?;

        let mut buf = vec![0u8; to_read];
        f.read_exact(&mut buf)
            .await
            .map_err(|e| Status::internal(format!("failed to read: {e}")))?;

        Ok(Response::new(ReadFileResponse {
            data: buf,
            size_bytes: size,
        }))
    }

    async fn write_file(
        &self,
        request: Request<WriteFileRequest>,
    ) -> Result<Response<WriteFileResponse>, Status> {
        let req = request.into_inner();
        let sandbox = self.sandbox(&req.bot_id).await?;
        write_file_checked(&sandbox, &req.path, &req.data).await?;
        Ok(Response::new(WriteFileResponse { ok: true }))
    }

    async fn mkdir(
        &self,
        request: Request<MkdirRequest>,
    ) -> Result<Response<MkdirResponse>, Status> {
        let req = request.into_inner();
        let sandbox = self.sandbox(&req.bot_id).await?;
        sandbox
            .mkdir_rel(&req.path, req.recursive)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(MkdirResponse { ok: true }))
    }

    async fn remove(
        &self,
        request: Request<RemoveRequest>,
    ) -> Result<Response<RemoveResponse>, Status> {
        let req = request.into_inner();
        let sandbox = self.sandbox(&req.bot_id).await?;

        let nominal = sandbox.resolve(&req.path).map_err(Status::from)?;
        let meta = tokio::fs::symlink_metadata(&nominal)
            .await
            .map_err(|_| Status::not_found("path not found"))?;
        if meta.file_type().is_symlink() {
            return Err(Status::invalid_argument("refusing to remove a symlink"));
        }

        let path = sandbox
            .resolve_existing(&req.path)
            .await
            .map_err(Status::from)?;

        if meta.is_dir() {
            if req.recursive {
                tokio::fs::remove_dir_all(&path)
                    .await
                    .map_err(|e| Status::internal(format!("remove failed: {e}")))?;
            } else {
                tokio::fs::remove_dir(&path)
                    .await
                    .map_err(|e| Status::internal(format!("remove failed: {e}")))?;
            }
        } else {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| Status::internal(format!("remove failed: {e}")))?;
        }

        Ok(Response::new(RemoveResponse { ok: true }))
    }

    async fn rename(
        &self,
        request: Request<RenameRequest>,
    ) -> Result<Response<RenameResponse>, Status> {
        let req = request.into_inner();
        let sandbox = self.sandbox(&req.bot_id).await?;

        let from = sandbox
            .resolve_existing(&req.from_path)
            .await
            .map_err(Status::from)?;

        let to_parent = sandbox
            .ensure_parent_dir(&req.to_path)
            .await
            .map_err(Status::from)?;
        let to_rel = normalize_rel_path(&req.to_path).map_err(Status::from)?;
        let to_name = to_rel
            .file_name()
            .ok_or_else(|| Status::invalid_argument("to_path must include a filename"))?;
        let to = to_parent.join(to_name);

        if tokio::fs::symlink_metadata(&to).await.is_ok() {
            return Err(Status::already_exists("target already exists"));
        }

        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| Status::internal(format!("rename failed: {e}")))?;
        Ok(Response::new(RenameResponse { ok: true }))
    }

    async fn upload_file(
        &self,
        request: Request<UploadFileRequest>,
    ) -> Result<Response<UploadFileResponse>, Status> {
        let req = request.into_inner();
        let sandbox = self.sandbox(&req.bot_id).await?;
        write_file_checked(&sandbox, &req.path, &req.data).await?;
        Ok(Response::new(UploadFileResponse { ok: true }))
    }
}

pub fn server(orchestrator: Orchestrator) -> FilesystemServiceServer<FilesystemApi> {
    FilesystemServiceServer::new(FilesystemApi::new(orchestrator))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SandboxRoot::new(dir.path());

        write_file_checked(&sandbox, "src/handlers/hello.py", b"print('hi')")
            .await
            .unwrap();

        let written = tokio::fs::read(dir.path().join("src/handlers/hello.py"))
            .await
            .unwrap();
        assert_eq!(written, b"print('hi')");
    }

    #[tokio::test]
    async fn write_outside_the_sandbox_is_rejected_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SandboxRoot::new(dir.path());

        let status = write_file_checked(&sandbox, "../../etc/passwd", b"x")
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);

        // Nothing escaped and nothing was created inside either.
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn write_refuses_symlink_targets() {
        let outside = tempfile::tempdir().unwrap();
        tokio::fs::write(outside.path().join("victim"), b"keep").await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("victim"), dir.path().join("link"))
            .unwrap();

        let sandbox = SandboxRoot::new(dir.path());
        let status = write_file_checked(&sandbox, "link", b"overwrite")
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let victim = tokio::fs::read(outside.path().join("victim")).await.unwrap();
        assert_eq!(victim, b"keep");
    }
}
