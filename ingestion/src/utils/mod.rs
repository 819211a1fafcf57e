pub mod fetch;
pub mod llm_instructions;
