pub mod combine;
pub mod config;
pub mod dirs;
pub mod error;
pub mod files;
pub mod generator;
pub mod handler;
pub mod include_bundler;
pub mod module_bundler;
pub mod objects;
pub mod reverser;
pub mod smoother;
pub mod util;

pub use config::Config;
pub use error::ModError;
pub use generator::Generator;
pub use reverser::Reverser;
