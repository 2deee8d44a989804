//! Building blocks of the `tided` binary: the daemon config file and the
//! standalone workload controller.

pub mod config;
pub mod controller;

pub use config::DaemonConfig;
pub use controller::StoreController;
