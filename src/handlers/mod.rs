pub mod approvals;
pub mod requests;
pub mod sync;
