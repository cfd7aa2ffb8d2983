pub mod application;
pub mod approval_step;
pub mod request;
pub mod sync_outbox;
pub mod user;
pub mod user_application;

pub use application::{Application, RoleMode};
pub use approval_step::{ApprovalStatus, ApprovalStep, CompletedStepRow, PendingApprovalRow};
pub use request::{AccessRequest, RequestStatus, RequestType, RoleSnapshot};
pub use sync_outbox::{SyncOutbox, SyncStatus};
pub use user::User;
pub use user_application::{RoleAssignment, RoleRef, UserApplication};
