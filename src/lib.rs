pub mod api;
pub mod cli;
pub mod error;
pub mod gossip;
pub mod node;
pub mod ring;
pub mod settings;
pub mod shell;
pub mod storage;
pub mod transport;
