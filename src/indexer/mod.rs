//! The block indexing engine.

pub mod appliers;
pub mod block;
pub mod challenges;
pub mod context;
pub mod error;
pub mod lock;
pub mod partition;
pub mod pool;
pub mod prefetch;
pub mod receipts;
pub mod revert;
pub mod scheduler;
pub mod signatures;
pub mod skip;

pub use block::{index_block, BlockOutcome};
pub use context::IndexerContext;
pub use error::{IndexerError, IndexingError, Stage};
pub use revert::{revert_blocks, RevertReport};
pub use scheduler::{initialize_blocks_table, run, run_pass, PassOutcome};
