//! Helper for spawning threads with FreeRTOS task names
//!
//! Rust's `std::thread::Builder::name()` sets the pthread name after creation,
//! but ESP-IDF creates the FreeRTOS task at pthread creation time with the
//! default name. This module uses `ThreadSpawnConfiguration` to set the name
//! (and priority) before spawning.

use anyhow::{Context, Result};
use esp_idf_hal::task::thread::ThreadSpawnConfiguration;
use std::ffi::CStr;
use std::thread::JoinHandle;

/// Spawn a thread with a FreeRTOS task name, stack size and priority.
///
/// FreeRTOS task names are limited to 16 characters including the null terminator.
/// Unlike `std::thread::spawn` this reports a failed task creation (out of
/// memory) as an error instead of panicking.
///
/// # Example
/// ```ignore
/// spawn_named(c"button", 4096, 6, || { /* ... */ })?;
/// ```
pub fn spawn_named<F, T>(
    name: &'static CStr,
    stack_size: usize,
    priority: u8,
    f: F,
) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    // Get current config to restore after spawn
    let prev_conf = ThreadSpawnConfiguration::get();

    let conf = ThreadSpawnConfiguration {
        name: Some(name.to_bytes_with_nul()),
        stack_size,
        priority,
        ..Default::default()
    };
    conf.set()
        .with_context(|| format!("failed to set spawn configuration for {name:?}"))?;

    let spawned = std::thread::Builder::new().stack_size(stack_size).spawn(f);

    // Restore previous config (or default if none was set)
    prev_conf
        .unwrap_or_default()
        .set()
        .context("failed to restore thread spawn configuration")?;

    spawned.with_context(|| format!("failed to spawn task {name:?}"))
}
