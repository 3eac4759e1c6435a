//! EdPlan Core Domain Logic
//!
//! This crate defines the domain entities, pure algorithms, and repository
//! abstractions of the assessment-to-IEP pipeline without any I/O
//! dependencies. Infrastructure implementations are provided through trait
//! implementations in `edplan-infra`.

pub mod students;
pub mod assessments;
pub mod quantification;
pub mod templates;
pub mod ieps;
pub mod vector;
pub mod flatten;
pub mod trace;
pub mod providers;

pub use students::*;
pub use assessments::*;
pub use quantification::*;
pub use templates::*;
pub use ieps::*;
pub use vector::*;
pub use flatten::*;
pub use trace::*;
pub use providers::*;
