//! Stage-side collaborators that are not inference calls
//!
//! - [`web_search`]: fetches search results that feed the web search stage
//! - [`documents`]: turns submitted documents into text for the extraction stage

pub mod documents;
pub mod web_search;

pub use documents::{DocumentExtractor, PlainTextExtractor};
pub use web_search::{SearchTool, SerperSearch};
