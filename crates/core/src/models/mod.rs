/// Domain models for the intake form
///
/// - `form`: field catalog and the in-memory form record
/// - `status`: editor activity status mirrored to viewers
pub mod form;
pub mod status;

pub use form::{FieldName, FormRecord};
pub use status::ActivityStatus;
