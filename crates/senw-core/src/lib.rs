#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::struct_excessive_bools,
    clippy::too_many_lines,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::doc_markdown
)]

pub mod ansi;
pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod model;
pub mod parser;
pub mod session;
pub mod status;
pub mod store;
pub mod sync;
pub mod traits;
pub mod ws;

pub use bus::{Change, Topic};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use events::EngineEvent;
pub use session::StreamIndicator;
pub use store::{EngineState, EntityStore};
