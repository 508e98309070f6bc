//! Vendor clients and their in-memory fakes.

pub mod gemini;
pub mod http;
pub mod mock;
pub mod news;
pub mod weather;

pub use gemini::{GeminiClient, GeminiSettings};
pub use news::NewsClient;
pub use weather::WeatherClient;
