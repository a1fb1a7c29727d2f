pub mod credential;
pub mod directory;
pub mod oauth;
pub mod provisioning;
pub mod resolver;
pub mod token;

pub use resolver::{AuthError, Credentials, Identity};
