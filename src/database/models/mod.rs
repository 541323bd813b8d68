pub mod profile;
pub mod project;
pub mod project_member;

pub use profile::Profile;
pub use project::{Project, ProjectStatus};
pub use project_member::{ProjectMember, ProjectMemberRole};
