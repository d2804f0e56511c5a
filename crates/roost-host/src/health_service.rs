use roost_proto::host_v1::host_health_service_server::{
    HostHealthService, HostHealthServiceServer,
};
use roost_proto::host_v1::{HealthCheckRequest, HealthCheckResponse};
use tonic::{Request, Response, Status};

#[derive(Debug, Default, Clone)]
pub struct HealthApi;

#[cfg(unix)]
fn free_bytes(p: &std::path::Path) -> u64 {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c = match CString::new(p.as_os_str().as_bytes()) {
        Ok(v) => v,
        Err(_) => return 0,
    };
    let mut s: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c.as_ptr(), &mut s) };
    if rc != 0 {
        return 0;
    }
    s.f_bsize.saturating_mul(s.f_bavail)
}

#[cfg(not(unix))]
fn free_bytes(_p: &std::path::Path) -> u64 {
    0
}

#[tonic::async_trait]
impl HostHealthService for HealthApi {
    async fn check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let data_root = crate::paths::data_root();

        let writable = std::fs::create_dir_all(&data_root)
            .and_then(|_| {
                let probe = data_root.join(".roost_write_probe");
                std::fs::write(&probe, b"ok\n").and_then(|_| std::fs::remove_file(probe))
            })
            .is_ok();

        Ok(Response::new(HealthCheckResponse {
            status: "SERVING".to_string(),
            host_version: env!("CARGO_PKG_VERSION").to_string(),
            data_root: data_root.display().to_string(),
            data_root_writable: writable,
            data_root_free_bytes: free_bytes(&data_root),
        }))
    }
}

pub fn server() -> HostHealthServiceServer<HealthApi> {
    HostHealthServiceServer::new(HealthApi)
}
