pub mod sources;
pub mod upstream;

pub use sources::{SOURCE_NAMES, SourceProfile};
pub use upstream::{HttpUpstream, RequestStyle, classify_response, render_endpoint};
