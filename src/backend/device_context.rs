//! Thread-local GPU device context management
//!
//! The current device is PER-THREAD, not global, exactly like the CUDA/HIP
//! runtimes: selecting a device only affects the calling thread, and a
//! kernel launched on a stream of another device is rejected.
//!
//! [`DeviceGuard`] makes the activation's device current for the duration of
//! a call and restores the previous selection on drop, whether the call
//! succeeded or not.

use std::cell::Cell;
use std::thread_local;

use crate::backend::KernelBackend;
use crate::error::ForgeResult;

thread_local! {
    /// `None` until a device has been selected on this thread
    static THREAD_DEVICE_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Current device for this thread, `None` if no device has been selected
pub fn get_thread_device() -> Option<usize> {
    THREAD_DEVICE_ID.with(|cell| cell.get())
}

fn set_thread_device(device: Option<usize>) {
    THREAD_DEVICE_ID.with(|cell| cell.set(device));
}

/// Ensure the current thread is using `expected_device`
///
/// Calls into the backend only when the cached device differs.
pub fn ensure_device<B: KernelBackend + ?Sized>(
    backend: &B,
    expected_device: usize,
) -> ForgeResult<()> {
    let current = get_thread_device();
    if current != Some(expected_device) {
        tracing::debug!(
            "Device mismatch: current={:?}, expected={}, selecting device {}",
            current,
            expected_device,
            expected_device
        );
        backend.set_device(expected_device)?;
        set_thread_device(Some(expected_device));
    }
    Ok(())
}

/// Returns true if the current thread's device is `expected_device`.
/// Does not change the selection.
pub fn verify_device(expected_device: usize) -> bool {
    get_thread_device() == Some(expected_device)
}

/// RAII device selection scoped to one call
pub struct DeviceGuard<'a, B: KernelBackend + ?Sized> {
    backend: &'a B,
    previous: Option<usize>,
    device: usize,
}

impl<'a, B: KernelBackend + ?Sized> DeviceGuard<'a, B> {
    pub fn new(backend: &'a B, device: usize) -> ForgeResult<Self> {
        let previous = get_thread_device();
        ensure_device(backend, device)?;
        Ok(Self {
            backend,
            previous,
            device,
        })
    }

    pub fn device(&self) -> usize {
        self.device
    }
}

impl<B: KernelBackend + ?Sized> Drop for DeviceGuard<'_, B> {
    fn drop(&mut self) {
        match self.previous {
            Some(previous) if previous != self.device => {
                if let Err(e) = self.backend.set_device(previous) {
                    tracing::warn!("Failed to restore device {}: {}", previous, e);
                    return;
                }
                set_thread_device(Some(previous));
            }
            Some(_) => {}
            None => set_thread_device(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::host::HostBackend;

    #[test]
    #[serial_test::serial]
    fn test_ensure_device_idempotent() {
        let backend = HostBackend::new(2);
        assert!(ensure_device(&backend, 1).is_ok());
        assert!(ensure_device(&backend, 1).is_ok());
        assert!(verify_device(1));
        assert_eq!(backend.stats().set_device_calls, 1);
        set_thread_device(None);
    }

    #[test]
    #[serial_test::serial]
    fn test_ensure_device_rejects_unknown_ordinal() {
        let backend = HostBackend::new(1);
        assert!(ensure_device(&backend, 3).is_err());
        assert!(!verify_device(3));
    }

    #[test]
    #[serial_test::serial]
    fn test_guard_restores_previous_device() {
        let backend = HostBackend::new(2);
        ensure_device(&backend, 0).unwrap();
        {
            let guard = DeviceGuard::new(&backend, 1).unwrap();
            assert_eq!(guard.device(), 1);
            assert!(verify_device(1));
        }
        assert!(verify_device(0));
        set_thread_device(None);
    }

    #[test]
    #[serial_test::serial]
    fn test_guard_clears_unset_device() {
        set_thread_device(None);
        let backend = HostBackend::new(1);
        {
            let _guard = DeviceGuard::new(&backend, 0).unwrap();
            assert_eq!(get_thread_device(), Some(0));
        }
        assert_eq!(get_thread_device(), None);
    }

    #[test]
    #[serial_test::serial]
    fn test_thread_isolation() {
        let backend = HostBackend::new(2);
        ensure_device(&backend, 1).unwrap();
        let other = std::thread::spawn(get_thread_device).join().unwrap();
        assert_eq!(other, None);
        set_thread_device(None);
    }
}
