pub mod profile_service;
pub mod project_member_service;
pub mod project_service;

pub use profile_service::{CreateProfileDto, ProfileService, ProfileView, UpdateProfileDto};
pub use project_member_service::{MemberAccess, MembershipKey, ProjectMemberService};
pub use project_service::{CreateProjectDto, ProjectAccess, ProjectService, UpdateProjectDto};
