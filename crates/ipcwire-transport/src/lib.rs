//! Local IPC transport with out-of-band handle passing.
//!
//! The decoder needs two things from a connection: exact-length blocking
//! reads, and the descriptors the peer attached, in the order it attached
//! them. [`Transport`] names that contract. Implementations:
//! - [`IpcStream`]: a connected Unix domain socket; descriptors travel as
//!   `SCM_RIGHTS` ancillary data
//! - [`MemoryTransport`]: an already-received message held in memory
//!
//! This is the lowest layer of ipcwire.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod ancillary;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::MemoryTransport;
pub use traits::{HandleSink, HandleSource, IpcStream, Transport};

#[cfg(unix)]
pub use ancillary::MAX_HANDLES_PER_TRANSFER;
#[cfg(unix)]
pub use uds::UnixDomainSocket;
