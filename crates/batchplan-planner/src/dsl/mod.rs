//! Request documents on disk.

pub mod yaml;
