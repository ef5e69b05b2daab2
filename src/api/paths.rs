//! All Paths are recorded here for use throughout this codebase
pub mod base {
    pub const ROOT: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
}

pub mod cluster {
    pub const MEMBERS: &str = "/members";
    pub const RING: &str = "/ring";
    pub const FILES: &str = "/files";
    pub const FILE: &str = "/files/:name";
    pub const STATS: &str = "/stats";
}
