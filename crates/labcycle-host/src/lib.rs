//! Host introspection for the lab lifecycle tooling.
//!
//! Classification is read-only and never fails: the `Detector` trait turns
//! whatever the host exposes (device-tree model, os-release) into a
//! `PlatformProfile`, defaulting to simulation-only when the evidence is
//! ambiguous. `HostInfo` is the seam tests use to fake a host.

pub mod detect;
pub mod host;
pub mod prereq;

pub use detect::{classify, Detector, FixedDetector, HostDetector};
pub use host::{HostInfo, SystemHost};
pub use prereq::{check_prereqs, format_missing, MissingPrereq};
