//! gRPC session agent service implementation.
//!
//! Exposes batch login/logout so a privileged host-side process can manage
//! iSCSI sessions on behalf of sandboxed callers. Both handlers delegate to
//! the batch orchestrator; any failure maps to a single generic status kind
//! carrying the first error's message.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use crate::iscsi::SessionManager;
use crate::metrics::OperationTimer;

/// Generated protobuf types and service trait
pub mod proto {
    tonic::include_proto!("iscsi_agent.v1");
}

use proto::iscsi_agent_server::IscsiAgent;
use proto::{LoginRequest, LoginResponse, LogoutRequest, LogoutResponse};

/// gRPC session agent service
///
/// Holds no per-call state; concurrent calls against overlapping targets
/// are serialized by the session manager's lock table.
pub struct AgentService {
    sessions: Arc<SessionManager>,
}

impl AgentService {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[tonic::async_trait]
impl IscsiAgent for AgentService {
    #[instrument(skip(self, request))]
    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        let timer = OperationTimer::new("login");
        let req = request.into_inner();
        info!(portals = %req.targets.join(", "), "Login request");

        match self.sessions.login_portals(&req.targets).await {
            Ok(()) => {
                timer.success();
                Ok(Response::new(LoginResponse {}))
            }
            Err(e) => {
                timer.failure("error");
                Err(Status::internal(e.to_string()))
            }
        }
    }

    #[instrument(skip(self, request))]
    async fn logout(
        &self,
        request: Request<LogoutRequest>,
    ) -> Result<Response<LogoutResponse>, Status> {
        let timer = OperationTimer::new("logout");
        let req = request.into_inner();
        info!(portals = %req.targets.join(", "), "Logout request");

        match self.sessions.logout_portals(&req.targets).await {
            Ok(()) => {
                timer.success();
                Ok(Response::new(LogoutResponse {}))
            }
            Err(e) => {
                timer.failure("error");
                Err(Status::internal(e.to_string()))
            }
        }
    }
}
