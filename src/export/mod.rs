pub mod copy;

pub use copy::{copy_file, ExportFailure, ExportReport, ExportedFile};
