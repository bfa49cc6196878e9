pub mod build;
pub mod catalog;
pub mod classify;
pub mod codec;
pub mod compute;
pub mod config;
mod dataset;
mod dtype;
mod dump;
mod errors;
mod extio;
mod field;
pub mod graph;
mod header;
pub mod mask;
pub mod source;
pub mod variable;

#[cfg(test)]
mod testing;

pub use catalog::Criteria;
pub use catalog::ExternRecord;
pub use catalog::Record;
pub use catalog::RecordId;
pub use catalog::RecordTable;
pub use classify::Advisory;
pub use compute::Executor;
pub use config::ChunkFailure;
pub use config::Config;
pub use config::MaskPairing;
pub use dataset::Dataset;
pub use dtype::DType;
pub use dump::Dump;
pub use errors::Error;
pub use errors::Result;
pub use field::Field;
pub use graph::TaskGraph;
pub use header::Grid;
pub use header::RecordHeader;
pub use header::TypeVariant;
pub use variable::Variable;
