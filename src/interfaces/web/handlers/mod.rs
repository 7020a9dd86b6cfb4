pub mod agents;
pub mod linear;
pub mod messages;
pub mod rules;
pub mod settings;
pub mod stream;
pub mod tasks;
