pub mod admin;
pub mod discovery;
pub mod error;
pub mod session;

pub use admin::{DEFAULT_COMMAND_TIMEOUT, IscsiAdm, IscsiAdmCli};
pub use discovery::{Target, parse_targets};
pub use error::{IscsiError, Result};
pub use session::{BatchOutcome, SessionManager};
