//! iSCSI Session Agent Library
//!
//! Orchestrates the Open-iSCSI initiator tool (iscsiadm) so higher-level
//! storage-attachment logic can attach and detach remote block volumes
//! without understanding the initiator toolchain.
//!
//! The library is split into several modules:
//! - `iscsi`: discovery parsing and session login/logout orchestration
//! - `service`: gRPC service implementation
//! - `metrics`: Prometheus metrics collection

pub mod iscsi;
pub mod metrics;
pub mod service;

pub use iscsi::{BatchOutcome, IscsiAdm, IscsiAdmCli, IscsiError, SessionManager, Target};
pub use service::{AgentService, proto};
