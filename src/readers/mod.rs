pub mod accumulator;
pub mod bulletin_reader;
pub mod definition_reader;

pub use accumulator::MetadataAccumulator;
pub use bulletin_reader::{BulletinEvent, BulletinReader, RawPlacemark, RawVariable};
pub use definition_reader::DefinitionReader;
