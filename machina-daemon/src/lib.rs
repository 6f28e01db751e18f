//! Attribute bus, providers and daemon lifecycle for the machina agent.

pub mod bus;
pub mod control;
mod error;
pub mod log_rotation;
pub mod paths;
pub mod pidfile;
pub mod protocol;
pub mod provider;
pub mod providers;
pub mod registry;
mod runtime;

pub use bus::{Bus, BusReceiver, Publisher};
pub use control::{restart, DaemonControl, DaemonTable, DAEMON_RUN};
pub use error::{BusError, DaemonError, ProviderError, RouteError, ShutdownError};
pub use pidfile::{PidFileGuard, PidFiles};
pub use protocol::{
    request_del, request_dump, request_get, request_set, request_status, request_stop,
    send_request, DaemonRequest, DaemonResponse,
};
pub use provider::{Lifecycle, Provider, ProviderState};
pub use registry::{PrefixConflict, Registry};
pub use runtime::{init_tracing, run, start_blocking, ProviderStatus};
