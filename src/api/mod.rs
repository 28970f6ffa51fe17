pub mod prompts;
pub mod routes;
