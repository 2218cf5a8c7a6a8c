pub mod handler;
pub mod notifier;
pub mod schemas;
