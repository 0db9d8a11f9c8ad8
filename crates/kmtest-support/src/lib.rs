//! kmtest support - helpers for tests that run against a loaded kernel module
//!
//! Test binaries built by the kmtest pipeline receive the path of the linked
//! kernel module through `KERNEL_MODULE`, whatever the execution shape. This
//! crate turns that handoff into a scoped module load, and provides the
//! kernel-log and device-node helpers the tests assert with.
//!
//! Tests must run single-threaded: every test shares the one loaded module.

pub mod device;
pub mod dmesg;
pub mod error;
pub mod module;

pub use device::{device_major_number, mknod, parse_major_number, temporary_file_path, UnlinkOnDrop};
pub use dmesg::{assert_dmesg_contains, dmesg_contains};
pub use error::{SupportError, SupportResult};
pub use module::{kernel_module_path, with_kernel_module, LoadedModule, KERNEL_MODULE};
