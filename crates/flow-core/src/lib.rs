pub mod artifact;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod feature;
pub mod io;
pub mod markdown;
pub mod paths;
pub mod pipeline;
pub mod prereq;
pub mod rules;
pub mod substitute;
pub mod template;
pub mod types;
pub mod workflow;

pub use error::{FlowError, Result};
