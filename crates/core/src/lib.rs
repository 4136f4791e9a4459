pub mod config;
pub mod error;
pub mod executor;
pub mod timer;
pub mod types;

pub use config::{
    load_dotenv, GeneratorConfig, MonitorConfig, PriorityConfig, SchedulerConfig, SchedulerSection,
};
pub use error::CoreError;
pub use executor::{Clock, ControlUnit, Executor, SimExecutor, UnitState};
pub use timer::ExpiryTimer;
pub use types::*;
