pub mod app_service;
pub mod discovery;
pub mod git_pool;
pub mod persistence;
