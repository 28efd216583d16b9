//! Review pipeline: rule catalog, classifier, enforcement and the loop
//! that ties them to the forum.

pub mod classifier;
pub mod executor;
pub mod restore;
pub mod review;
pub mod rules;

pub use classifier::{Classifier, ClassifierSettings, Decision, ImageFinding, ReviewContext};
pub use executor::{Enforcer, EnforcerSettings, ExecutionResult, StepOutcome};
pub use restore::RestoreSchedule;
pub use review::{ReviewLoop, ReviewLoopSettings, ReviewStats, Reviewer, WatchedForum};
pub use rules::{Category, Rule, CATALOG};
