pub mod api_client;
pub mod authorizer;
pub mod clock;
pub mod guard;
pub mod session;
pub mod storage;
pub mod store;
pub mod token;
