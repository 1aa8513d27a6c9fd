//! Classroom management backend: accounts, assignments with submissions and grading, and
//! audience-targeted polls, served over a JSON API with role and permission gates.

pub mod client;
pub mod config;
pub mod database;
pub mod endpoints;
pub mod error;
pub mod model;
pub mod security;
