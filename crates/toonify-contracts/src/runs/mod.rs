pub mod record;

pub use record::{read_record, write_record, ImageRecord, RECORD_SCHEMA_VERSION};
