pub mod fallback;
pub mod model;
pub mod validate;

pub use fallback::ResolvedEnrichment;
pub use model::{PropertyRecord, ReportMetadata, ReportRequest};
pub use validate::{FieldError, RejectedProperty, ValidationErrors, validate_document, validate_partitioned};
