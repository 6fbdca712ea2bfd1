pub mod azure_search;
pub mod in_memory;

pub use azure_search::AzureSearchIndex;
pub use in_memory::InMemoryVectorIndex;
