pub mod credential;
pub mod identity;
pub mod scan;
pub mod telemetry;
pub mod topics;

pub use credential::*;
pub use identity::*;
pub use scan::*;
pub use telemetry::*;
