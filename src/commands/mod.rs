// Single-stream commands
pub mod stream;

// Bulk commands
pub mod downtime;

// Configuration
pub mod config;
