//! Embedded FHIR R4 type tables.
//!
//! Everything in this crate is a build-time constant: the choice-type map
//! (`value[x]`-style polymorphic fields), the element table (declared type and
//! cardinality per `Type.element` path), and the primitive column-type model
//! used for the declared output columns of a view.
//!
//! Extending any table is an append-only edit; no other crate needs to change.

pub mod choice;
pub mod column;
pub mod elements;

pub use choice::{choice_field_key, choice_types_for, is_choice_field};
pub use column::{ColumnInfo, ColumnType};
pub use elements::{element_info, Cardinality, ElementInfo};
