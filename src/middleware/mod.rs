pub mod guard;
pub mod identity_loader;
pub mod request_logger;
