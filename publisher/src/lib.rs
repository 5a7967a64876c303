pub(crate) mod credentials;
pub(crate) mod docker;
pub(crate) mod engine;
pub(crate) mod git;
pub(crate) mod history;
pub(crate) mod lock;
pub(crate) mod publisher;
pub(crate) mod session;
pub(crate) mod temp_path;
pub(crate) mod version;

pub mod cli;
pub mod deadline;
pub mod image;
pub mod process;
pub mod timestamp;

pub(crate) type Result<T, E = Box<dyn std::error::Error + Send + Sync + 'static>> =
    std::result::Result<T, E>;
