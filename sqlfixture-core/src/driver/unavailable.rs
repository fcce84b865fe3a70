//! Stand-in driver used when the native library is absent.
//!
//! Every connect fails with [`DriverError::Unavailable`], which the
//! bootstrap turns into a skip rather than a failure.

use super::{Connection, Driver, DriverError, DriverResult};
use crate::profile::ConnectionTarget;
use std::time::Duration;

/// Driver that reports itself unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableDriver;

impl Driver for UnavailableDriver {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn connect(
        &self,
        _target: &ConnectionTarget,
        _timeout: Duration,
    ) -> DriverResult<Box<dyn Connection>> {
        Err(DriverError::Unavailable)
    }
}
