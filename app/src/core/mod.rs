pub mod cbor;
pub mod id;
pub mod resilience;

pub use id::DeviceUid;
pub use resilience::ExponentialBackoff;
