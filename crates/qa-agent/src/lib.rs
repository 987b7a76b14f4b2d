pub mod agent;
pub mod conversation;
pub mod errors;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod qa_system;
pub mod router;
pub mod systems;
