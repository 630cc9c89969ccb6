pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::{AgentLimits, BrowserSettings, Config, ProviderSettings};
pub use error::{Error, Result};
pub use protocol::{BufferSink, EventSink, Outcome, ProtocolEvent, RequiredField, StdoutSink};
