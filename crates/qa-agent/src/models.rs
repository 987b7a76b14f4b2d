//! These models represent the objects passed around by the agent
//!
//! There are two related formats we need to interact with besides our own:
//! - gemini contents/function declarations, sent from the agent to the LLM
//! - openai messages/tools, sent from the agent to the LLM
//!
//! We always immediately convert those data models into the internal structs using
//! the helpers in `providers::utils`, so the internal models are not an exact match
//! to either format.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
