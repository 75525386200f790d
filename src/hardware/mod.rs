//! Hardware access: port enumeration, async serial links, and simulated devices.

pub mod mock;
pub mod ports;
pub mod serial;

pub use mock::{MockConnector, MockDevice, MockGps, MockXl2};
pub use ports::{FixedPortEnumerator, PortDescriptor, PortEnumerator, PortIdentity, SystemPortEnumerator};
pub use serial::{SerialConnector, SerialLink, TokioSerialConnector};
