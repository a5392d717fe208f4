//! Stage implementations (C4 consumers), grouped by the heap capability they operate on.

pub mod config;
pub mod exchange;
pub mod grant;
pub mod proxy;
pub mod role;
pub mod token;
