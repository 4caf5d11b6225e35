pub mod permission;
pub mod role_assignment;
pub mod task;

pub use permission::{PermissionRequirement, PermissionType};
pub use role_assignment::{Classification, GrantType, RoleAssignment, RoleAttributes, RoleCategory};
pub use task::{Task, TaskAccessProfile, TaskAttributes, TaskState};
