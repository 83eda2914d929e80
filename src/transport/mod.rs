//! Transport layer between the driver and the radio.
//!
//! The driver runs over any duplex byte stream. [`TransportBuffer`] adds the
//! read-ahead and put-back the frame scanners need; [`serial`] opens the
//! serial port a real radio is attached to.

pub mod buffer;
pub mod serial;

pub use buffer::{DEFAULT_READ_TIMEOUT, TransportBuffer};
pub use serial::{SerialConfig, list_ports};
