use roost_core::{BotState, Runtime};
use roost_proto::host_v1::bot_service_server::{BotService, BotServiceServer};
use roost_proto::host_v1::{
    AddPackageRequest, AddPackageResponse, BotInfo, BotRuntime as ProtoBotRuntime,
    BotState as ProtoBotState, DeleteBotRequest, DeleteBotResponse, DeleteEnvVarRequest,
    DeleteEnvVarResponse, DeployRequest, DeployResponse, EnvVar, GetBotRequest, GetBotResponse,
    GetStatsRequest, GetStatsResponse, ListBotsRequest, ListBotsResponse, ListEnvVarsRequest,
    ListEnvVarsResponse, RemovePackageRequest, RemovePackageResponse, RestartBotRequest,
    RestartBotResponse, SetEnvVarRequest, SetEnvVarResponse, StartBotRequest, StartBotResponse,
    StopBotRequest, StopBotResponse,
};
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::orchestrator::{BotSnapshot, Orchestrator};

#[derive(Clone)]
pub struct BotApi {
    orchestrator: Orchestrator,
}

impl BotApi {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    async fn snapshot(&self, bot_id: Uuid) -> Result<BotInfo, Status> {
        let snap = self.orchestrator.get_bot(bot_id).await.map_err(Status::from)?;
        Ok(bot_info(&snap))
    }
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, Status> {
    raw.trim()
        .parse()
        .map_err(|_| Status::invalid_argument(format!("invalid {what}")))
}

fn map_runtime(raw: i32) -> Result<Runtime, Status> {
    match ProtoBotRuntime::try_from(raw) {
        Ok(ProtoBotRuntime::Python) => Ok(Runtime::Python),
        Ok(ProtoBotRuntime::Node) => Ok(Runtime::Node),
        _ => Err(Status::invalid_argument("runtime must be python or node")),
    }
}

fn runtime_to_proto(raw: &str) -> ProtoBotRuntime {
    match Runtime::parse(raw) {
        Some(Runtime::Python) => ProtoBotRuntime::Python,
        Some(Runtime::Node) => ProtoBotRuntime::Node,
        None => ProtoBotRuntime::Unspecified,
    }
}

fn state_to_proto(raw: &str) -> ProtoBotState {
    match BotState::parse(raw) {
        Some(BotState::Stopped) => ProtoBotState::Stopped,
        Some(BotState::Installing) => ProtoBotState::Installing,
        Some(BotState::Starting) => ProtoBotState::Starting,
        Some(BotState::Running) => ProtoBotState::Running,
        Some(BotState::Stopping) => ProtoBotState::Stopping,
        Some(BotState::Error) => ProtoBotState::Error,
        None => ProtoBotState::Unspecified,
    }
}

fn bot_info(snap: &BotSnapshot) -> BotInfo {
    let m = &snap.model;
    BotInfo {
        bot_id: m.id.to_string(),
        user_id: m.user_id.to_string(),
        name: m.name.clone(),
        runtime: runtime_to_proto(&m.runtime) as i32,
        state: state_to_proto(&m.status) as i32,
        bot_directory: m.bot_directory.clone().unwrap_or_default(),
        entry_point: m.entry_point.clone().unwrap_or_default(),
        error_message: m.error_message.clone().unwrap_or_default(),
        pid: snap.pid.unwrap_or_default(),
        has_pid: snap.pid.is_some(),
    }
}

#[tonic::async_trait]
impl BotService for BotApi {
    async fn deploy(
        &self,
        request: Request<DeployRequest>,
    ) -> Result<Response<DeployResponse>, Status> {
        let req = request.into_inner();
        let user_id = parse_uuid(&req.user_id, "user_id")?;
        let runtime = map_runtime(req.runtime)?;
        let env = req.env.into_iter().map(|v| (v.key, v.value)).collect();

        let bot = self
            .orchestrator
            .deploy(user_id, &req.name, runtime, &req.archive, env)
            .await
            .map_err(Status::from)?;

        let info = self.snapshot(bot.id).await?;
        Ok(Response::new(DeployResponse { bot: Some(info) }))
    }

    async fn get(&self, request: Request<GetBotRequest>) -> Result<Response<GetBotResponse>, Status> {
        let req = request.into_inner();
        let bot_id = parse_uuid(&req.bot_id, "bot_id")?;
        let info = self.snapshot(bot_id).await?;
        Ok(Response::new(GetBotResponse { bot: Some(info) }))
    }

    async fn list(
        &self,
        request: Request<ListBotsRequest>,
    ) -> Result<Response<ListBotsResponse>, Status> {
        let req = request.into_inner();
        let user_id = parse_uuid(&req.user_id, "user_id")?;
        let bots = self
            .orchestrator
            .list_bots(user_id)
            .await
            .map_err(Status::from)?
            .iter()
            .map(bot_info)
            .collect();
        Ok(Response::new(ListBotsResponse { bots }))
    }

    async fn start(
        &self,
        request: Request<StartBotRequest>,
    ) -> Result<Response<StartBotResponse>, Status> {
        let req = request.into_inner();
        let bot_id = parse_uuid(&req.bot_id, "bot_id")?;
        self.orchestrator.start(bot_id).await.map_err(Status::from)?;
        let info = self.snapshot(bot_id).await?;
        Ok(Response::new(StartBotResponse { bot: Some(info) }))
    }

    async fn stop(
        &self,
        request: Request<StopBotRequest>,
    ) -> Result<Response<StopBotResponse>, Status> {
        let req = request.into_inner();
        let bot_id = parse_uuid(&req.bot_id, "bot_id")?;
        self.orchestrator.stop(bot_id).await.map_err(Status::from)?;
        let info = self.snapshot(bot_id).await?;
        Ok(Response::new(StopBotResponse { bot: Some(info) }))
    }

    async fn restart(
        &self,
        request: Request<RestartBotRequest>,
    ) -> Result<Response<RestartBotResponse>, Status> {
        let req = request.into_inner();
        let bot_id = parse_uuid(&req.bot_id, "bot_id")?;
        self.orchestrator.restart(bot_id).await.map_err(Status::from)?;
        let info = self.snapshot(bot_id).await?;
        Ok(Response::new(RestartBotResponse { bot: Some(info) }))
    }

    async fn delete(
        &self,
        request: Request<DeleteBotRequest>,
    ) -> Result<Response<DeleteBotResponse>, Status> {
        let req = request.into_inner();
        let bot_id = parse_uuid(&req.bot_id, "bot_id")?;
        self.orchestrator.delete(bot_id).await.map_err(Status::from)?;
        Ok(Response::new(DeleteBotResponse { ok: true }))
    }

    async fn set_env_var(
        &self,
        request: Request<SetEnvVarRequest>,
    ) -> Result<Response<SetEnvVarResponse>, Status> {
        let req = request.into_inner();
        let bot_id = parse_uuid(&req.bot_id, "bot_id")?;
        self.orchestrator
            .set_env_var(bot_id, &req.key, &req.value)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(SetEnvVarResponse { ok: true }))
    }

    async fn delete_env_var(
        &self,
        request: Request<DeleteEnvVarRequest>,
    ) -> Result<Response<DeleteEnvVarResponse>, Status> {
        let req = request.into_inner();
        let bot_id = parse_uuid(&req.bot_id, "bot_id")?;
        self.orchestrator
            .delete_env_var(bot_id, &req.key)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(DeleteEnvVarResponse { ok: true }))
    }

    async fn list_env_vars(
        &self,
        request: Request<ListEnvVarsRequest>,
    ) -> Result<Response<ListEnvVarsResponse>, Status> {
        let req = request.into_inner();
        let bot_id = parse_uuid(&req.bot_id, "bot_id")?;
        let vars = self
            .orchestrator
            .list_env_vars(bot_id)
            .await
            .map_err(Status::from)?
            .into_iter()
            .map(|v| EnvVar {
                key: v.key,
                value: v.value,
            })
            .collect();
        Ok(Response::new(ListEnvVarsResponse { vars }))
    }

    async fn add_package(
        &self,
        request: Request<AddPackageRequest>,
    ) -> Result<Response<AddPackageResponse>, Status> {
        let req = request.into_inner();
        let bot_id = parse_uuid(&req.bot_id, "bot_id")?;
        let output = self
            .orchestrator
            .add_package(bot_id, &req.package)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(AddPackageResponse { output }))
    }

    async fn remove_package(
        &self,
        request: Request<RemovePackageRequest>,
    ) -> Result<Response<RemovePackageResponse>, Status> {
        let req = request.into_inner();
        let bot_id = parse_uuid(&req.bot_id, "bot_id")?;
        let output = self
            .orchestrator
            .remove_package(bot_id, &req.package)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(RemovePackageResponse { output }))
    }

    async fn get_stats(
        &self,
        request: Request<GetStatsRequest>,
    ) -> Result<Response<GetStatsResponse>, Status> {
        let req = request.into_inner();
        let bot_id = parse_uuid(&req.bot_id, "bot_id")?;
        let (running, usage) = self.orchestrator.stats(bot_id).await.map_err(Status::from)?;
        Ok(Response::new(GetStatsResponse {
            running,
            cpu_percent_x100: usage.map(|u| u.cpu_percent_x100).unwrap_or(0),
            rss_bytes: usage.map(|u| u.rss_bytes).unwrap_or(0),
        }))
    }
}

pub fn server(orchestrator: Orchestrator) -> BotServiceServer<BotApi> {
    BotServiceServer::new(BotApi::new(orchestrator))
}
