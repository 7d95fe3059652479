// src/services/mod.rs
pub mod analysis_service;
pub mod gemini_client;
pub mod prompt_builder;
pub mod rate_limiter;
pub mod report;

pub use analysis_service::AnalysisService;
pub use gemini_client::GeminiClient;
pub use rate_limiter::RequestGate;
