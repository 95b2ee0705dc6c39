// SPDX-License-Identifier: Apache-2.0

//! Worker runner implementations: an in-process runner that hosts vendor
//! services as trait objects, and a wrapper that limits each target to one
//! live instance.

#[cfg(feature = "inproc")]
pub mod inproc;
pub mod serialized;

#[cfg(feature = "inproc")]
pub use inproc::{service_fn, InprocInstance, InprocRunner, VendorService};
pub use serialized::SerializedRunner;

use isoflow_core::WorkerTarget;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("no isolated service registered for {0}")]
    UnknownService(WorkerTarget),

    #[error("handle for {0} was not created by this runner")]
    ForeignHandle(WorkerTarget),

    #[error("worker instance {0} is not live")]
    InstanceGone(u64),
}
