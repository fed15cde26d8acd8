// Courier - durable request delivery for push and analytics clients
//
// This library stores important backend requests in a persistent vault and
// delivers them eventually, retrying with backoff and honoring user consent.

// Re-export the vault
#[cfg(feature = "vault")]
pub use courier_vault::*;

#[cfg(feature = "vault")]
pub use courier_vault;

#[cfg(feature = "log")]
pub use courier_log;

/// Install the default log subscriber, configured from `COURIER_*` variables.
#[cfg(feature = "log")]
pub fn init_logging() {
    courier_log::init();
}

// Prelude for common imports
#[cfg(feature = "vault")]
pub mod prelude {
    pub use courier_vault::prelude::*;
}
