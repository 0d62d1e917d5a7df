// Dashboard services and the application event loop.

pub mod app;
pub mod conversation;
pub mod format;
pub mod leads;
pub mod messaging;
pub mod notice;
pub mod protocol;
pub mod session;
pub mod stats;
