//! CRDS user-management domain: status, payloads, API client and the
//! cross-system user operations

pub mod client;
pub mod payload;
pub mod status;
pub mod system;

pub use client::CrdsUserClient;
pub use payload::CreateUserRequest;
pub use status::UserStatus;
pub use system::{CrdsUser, UserVerification, VerifyOptions};
