pub mod agent;
pub mod hub;
pub mod notification;
pub mod order;
