//! Library side of the `edm` binary: CSV input, logging and the state directory.

pub mod io;
pub mod logging;
pub mod state;
