mod metadata;
mod tuple;

pub use metadata::TupleMetadata;
pub use tuple::Tuple;
