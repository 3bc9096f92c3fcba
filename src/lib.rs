pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod insight;
pub mod intent;
pub mod oracle;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod synthesizer;
pub mod validator;
