mod routes;
mod server;
mod state;
mod static_files;

pub use server::GatewayServer;
