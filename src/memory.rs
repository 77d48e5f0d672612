//! `MemoryStore` external interface (§1, §4.6 step 2).
//!
//! Vector store / embedding retrieval is explicitly out of core scope (§1);
//! the core only consumes this narrow capability. Shaped after
//! `resource_protocol.rs`'s `ResourceProtocol` trait: application-provided
//! contextual data the runtime reads but does not own.

use async_trait::async_trait;
use std::error::Error;

/// One retrieved memory snippet, ready for interpolation into a prompt via
/// the `{context}` placeholder (§4.4).
#[derive(Debug, Clone)]
pub struct MemorySnippet {
    pub text: String,
    /// Retrieval relevance score, if the backing store reports one.
    pub score: Option<f32>,
}

/// Vector retrieval given a query and a collection id (external; not
/// implemented here — §1, §2).
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Retrieve up to `k` snippets relevant to `query` within
    /// `collection_id`.
    async fn retrieve(
        &self,
        query: &str,
        collection_id: &str,
        k: usize,
    ) -> Result<Vec<MemorySnippet>, Box<dyn Error + Send + Sync>>;
}
