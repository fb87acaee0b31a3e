//! Authentication: credential caching, device-code acquisition, and
//! bearer-token verification against a remote key set.

pub mod cache;
pub mod device;
pub mod verify;

pub use cache::{Credential, CredentialCache, TokenStore};
pub use device::TokenAcquirer;
pub use verify::{AuthContext, KeySetResolver, TokenVerifier};
