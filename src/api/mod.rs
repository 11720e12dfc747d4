// HTTP control surface for the sync runner

pub mod auth;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use models::AppState;
pub use server::ApiServer;
