pub mod anthropic;
pub mod ollama;
pub mod openai_compatible;
pub mod openai_responses;
