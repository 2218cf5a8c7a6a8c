pub mod callback;
pub mod os_tool;
pub mod process_handle;
pub mod process_tool;
pub mod terminal_registry;
pub mod terminal_session;
pub mod terminal_tool;
