use log::{debug, warn};

#[derive(thiserror::Error, Debug)]
pub enum SchedulingError {
    #[error("priority {0} outside the SCHED_FIFO range")]
    InvalidPriority(i32),
    #[error("sched_setscheduler failed: {0}")]
    Denied(String),
    #[error("real-time scheduling not supported on this platform")]
    Unsupported,
}

/// Switches the calling thread to SCHED_FIFO at `priority`.
#[cfg(target_os = "linux")]
pub fn try_realtime(priority: i32) -> Result<(), SchedulingError> {
    let (min, max) = unsafe {
        (
            libc::sched_get_priority_min(libc::SCHED_FIFO),
            libc::sched_get_priority_max(libc::SCHED_FIFO),
        )
    };
    if priority < min || priority > max {
        return Err(SchedulingError::InvalidPriority(priority));
    }

    let result = unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = priority;
        libc::sched_setscheduler(0, libc::SCHED_FIFO, &param)
    };
    if result != 0 {
        return Err(SchedulingError::Denied(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn try_realtime(_priority: i32) -> Result<(), SchedulingError> {
    Err(SchedulingError::Unsupported)
}

/// Best-effort real-time request. Failure is logged and the thread keeps its
/// current scheduling class.
pub fn request_realtime(priority: i32) -> bool {
    match try_realtime(priority) {
        Ok(()) => {
            debug!("SCHED_FIFO priority {} granted", priority);
            true
        }
        Err(err) => {
            warn!("continuing without real-time scheduling: {}", err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_priority_is_not_fatal() {
        assert!(!request_realtime(10_000));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn out_of_range_priority_is_reported() {
        assert!(matches!(
            try_realtime(-5),
            Err(SchedulingError::InvalidPriority(-5))
        ));
    }
}
