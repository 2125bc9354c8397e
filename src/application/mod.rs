//! Application services: paste orchestration and its collaborator contracts.

pub mod access;
pub mod error;
pub mod lookup;
pub mod paste;
pub mod repos;
pub mod tasks;
