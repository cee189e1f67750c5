//! Skills: the contract, the base wrapper, the registry and the built-ins.

pub mod base;
pub mod builtin;
pub mod context;
pub mod error;
pub mod input;
pub mod registry;
pub mod skill;

pub use base::{BaseSkill, SkillLogic, run_guarded, validate_guarded};
pub use context::{ProgressReporter, ProgressUpdate, SkillContext, UsageMeter};
pub use error::{SkillError, SkillErrorKind};
pub use registry::SkillRegistry;
pub use skill::{
    AiUsage, FieldError, Skill, SkillDescriptor, SkillMetadata, SkillOutcome, SkillResult,
    ValidationResult,
};
