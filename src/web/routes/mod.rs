pub mod message_routes;
pub mod push_routes;
