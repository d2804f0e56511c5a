use std::pin::Pin;

use futures_util::Stream;
use roost_core::LogSource;
use roost_proto::host_v1::log_stream_service_server::{LogStreamService, LogStreamServiceServer};
use roost_proto::host_v1::{
    LogChunk as ProtoLogChunk, LogSource as ProtoLogSource, SubscribeLogsRequest,
};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct LogStreamApi {
    orchestrator: Orchestrator,
}

impl LogStreamApi {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[tonic::async_trait]
impl LogStreamService for LogStreamApi {
    type SubscribeStream = Pin<Box<dyn Stream<Item = Result<ProtoLogChunk, Status>> + Send>>;

    async fn subscribe(
        &self,
        request: Request<SubscribeLogsRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let req = request.into_inner();
        let bot_id: Uuid = req
            .bot_id
            .trim()
            .parse()
            .map_err(|_| Status::invalid_argument("invalid bot_id"))?;

        // Subscribing before the bot runs is fine, but the bot must exist.
        self.orchestrator
            .get_bot(bot_id)
            .await
            .map_err(Status::from)?;

        let rx = self.orchestrator.broadcaster().subscribe(bot_id).await;
        let bot_id_str = bot_id.to_string();
        let stream = UnboundedReceiverStream::new(rx).map(move |chunk| {
            let source = match chunk.source {
                LogSource::Stdout => ProtoLogSource::Stdout,
                LogSource::Stderr => ProtoLogSource::Stderr,
            };
            Ok(ProtoLogChunk {
                bot_id: bot_id_str.clone(),
                source: source as i32,
                line: chunk.line,
            })
        });

        Ok(Response::new(Box::pin(stream)))
    }
}

pub fn server(orchestrator: Orchestrator) -> LogStreamServiceServer<LogStreamApi> {
    LogStreamServiceServer::new(LogStreamApi::new(orchestrator))
}
