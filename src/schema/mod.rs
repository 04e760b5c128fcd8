//! Schema subsystem.
//!
//! # Data Flow
//! ```text
//! Route declares descriptors (descriptor.rs)
//!     → inbound raw input → validator.rs → normalized value → typed input
//!     → handler reply    → serializer.rs → validated bytes (strict | lenient)
//!     → descriptors      → to_json_schema → OpenAPI document
//! ```
//!
//! # Design Decisions
//! - One descriptor serves validation, serialization and documentation
//! - Validation never stops at the first problem

pub mod descriptor;
pub mod serializer;
pub mod validator;

pub use descriptor::{Field, NumberRules, ObjectSchema, Schema, StringRules, UnknownKeys};
pub use serializer::{ContractMode, OutputSerializer, SerializationError};
pub use validator::{
    validate, validate_as, validate_with, Issue, IssueCode, ValidateOptions, ValidationError,
    ValidationResult,
};
