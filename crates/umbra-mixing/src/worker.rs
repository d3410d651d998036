//! The periodic mixing worker.
//!
//! One long-running thread per process drives everything time-based: sync
//! progress, mixer-list maintenance, session timeouts, ready-queue checks,
//! and jittered runs of the automatic-denomination driver.

use crate::client::ClientPool;
use crate::interfaces::{MixerDirectory, SyncTracker};
use crate::mixer::MixerPool;
use crate::{now_millis, AUTO_MIX_INTERVAL_MAX_SECS, AUTO_MIX_INTERVAL_MIN_SECS};
use log::{debug, info};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

static WORKER_RUNNING: AtomicBool = AtomicBool::new(false);

/// Handle to the running worker thread.
pub struct MixWorker {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl MixWorker {
    /// Spawn the worker. Returns `None` if one is already running in this
    /// process; there is never more than one.
    pub fn spawn(
        client: Arc<ClientPool>,
        mixer: Option<Arc<MixerPool>>,
        sync: Arc<dyn SyncTracker>,
        directory: Arc<dyn MixerDirectory>,
    ) -> Option<MixWorker> {
        if WORKER_RUNNING.swap(true, Ordering::SeqCst) {
            debug!("mixing worker already running");
            return None;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = shutdown.clone();

        let spawned = thread::Builder::new()
            .name("umbra-mixing".to_string())
            .spawn(move || {
                run_loop(client, mixer, sync, directory, shutdown_flag);
                WORKER_RUNNING.store(false, Ordering::SeqCst);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(_) => {
                WORKER_RUNNING.store(false, Ordering::SeqCst);
                return None;
            }
        };

        info!("mixing worker started");
        Some(MixWorker {
            handle: Some(handle),
            shutdown,
        })
    }

    /// Request shutdown and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MixWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(
    client: Arc<ClientPool>,
    mixer: Option<Arc<MixerPool>>,
    sync: Arc<dyn SyncTracker>,
    directory: Arc<dyn MixerDirectory>,
    shutdown: Arc<AtomicBool>,
) {
    let mut tick: u64 = 0;
    let mut next_auto_run = tick + AUTO_MIX_INTERVAL_MIN_SECS;

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_secs(1));

        // Advance sync from all available nodes, one step at a time.
        sync.process_tick();
        if !sync.is_blockchain_synced() {
            continue;
        }

        tick += 1;
        let now_ms = now_millis();

        if tick % 60 == 0 {
            directory.check_and_remove();
        }
        if mixer.is_some() && tick % (60 * 5) == 0 {
            directory.verify_step();
        }

        client.check_timeout(now_ms);
        if let Some(mixer) = &mixer {
            mixer.check_timeout(now_ms);
            mixer.check_for_complete_queue(now_ms);
        }

        if tick == next_auto_run {
            client.do_automatic_denominating(false, now_ms);
            let jitter = rand::thread_rng()
                .gen_range(0..=AUTO_MIX_INTERVAL_MAX_SECS - AUTO_MIX_INTERVAL_MIN_SECS);
            next_auto_run = tick + AUTO_MIX_INTERVAL_MIN_SECS + jitter;
        }
    }
}
