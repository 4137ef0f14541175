//! Integration tests: the full ingest → close → gate → settle pipeline
//! driven by a deterministic in-memory feed.

mod mock_provider;
mod pipeline;
