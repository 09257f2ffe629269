//! Object store backends and the drive engine built on them.

pub mod drive_service;
pub mod local_store;
pub mod memory_store;
pub mod object_store;
pub mod paths;
