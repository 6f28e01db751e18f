//! Built-in providers.
//!
//! | provider  | owns                  | detection                          |
//! |-----------|-----------------------|------------------------------------|
//! | `machine` | `machine`             | publish once, idle                 |
//! | `cmdline` | `cmdline.`            | parse, then re-parse on file change|
//! | `uptime`  | `uptime`, `boot.time` | interval poll                      |
//! | attrs     | configured prefixes   | publish table, accept set / del    |

pub mod attrs;
pub mod cmdline;
pub mod machine;
pub mod uptime;

use std::sync::Arc;
use std::time::Duration;

use machina_core::AgentConfig;

use crate::bus::Bus;
use crate::registry::Registry;

pub use attrs::AttrsProvider;
pub use cmdline::CmdlineProvider;
pub use machine::MachineProvider;
pub use uptime::UptimeProvider;

/// Register every built-in provider configured by `config`.
pub fn build_registry(config: &AgentConfig, bus: &Bus) -> Registry {
    let mut registry = Registry::new();
    registry.register(Arc::new(MachineProvider::new(config.machine.clone(), bus)));
    registry.register(Arc::new(CmdlineProvider::new(config.cmdline.clone(), bus)));
    registry.register(Arc::new(UptimeProvider::new(
        Duration::from_secs(config.uptime_interval_secs.max(1)),
        bus,
    )));
    for (name, table) in &config.attrs {
        registry.register(Arc::new(AttrsProvider::new(name.clone(), table, bus)));
    }
    registry
}
