//! Serial protocols of the two devices.
//!
//! - [`commands`]: the XL2 command set and input validation
//! - [`response`]: classification of XL2 reply lines
//! - [`session`]: the XL2 connection lifecycle and continuous sampling loop
//! - [`gps`]: the GPS receiver link

pub mod commands;
pub mod gps;
pub mod response;
pub mod session;

pub use gps::{GpsSession, GpsStatus};
pub use response::Response;
pub use session::{SessionState, SessionStatus, Xl2Session};
