//! Fault campaigns: sequential execution of a configured fault list
//! on a dedicated worker thread.
//!
//! The worker waits `injection_period` between steps using a condition
//! variable so that stop and emergency requests interrupt the wait
//! immediately instead of after a full sleep.

use crate::faults::FaultInjectionConfig;
use crate::injector::{FaultInjector, InjectorInner};
use log::{error, info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;

impl FaultInjector {
    /// Start a campaign over `configs`, one injection per entry.
    ///
    /// Rejects an uninitialized injector and empty lists.  A campaign
    /// that is still running is stopped and joined first, so two
    /// campaigns never overlap.
    pub fn start_fault_campaign(&self, configs: Vec<FaultInjectionConfig>) -> bool {
        if !self.inner.initialized.load(Ordering::SeqCst) {
            error!("cannot start campaign: injector not initialized");
            return false;
        }
        if configs.is_empty() {
            error!("cannot start campaign: no fault configurations");
            return false;
        }

        if self.inner.campaign_active.load(Ordering::SeqCst) {
            warn!("campaign already running, stopping it first");
            self.stop_fault_campaign();
        }

        *self.inner.campaign.stop.lock().unwrap() = false;
        self.inner.campaign_active.store(true, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("fault-campaign".into())
            .spawn(move || campaign_loop(&inner, configs))
            .expect("failed to spawn fault campaign thread");
        *self.worker.lock().unwrap() = Some(handle);

        info!("fault campaign started");
        true
    }

    /// Signal the campaign worker and join it.  Idempotent.
    pub fn stop_fault_campaign(&self) {
        {
            let mut stop = self.inner.campaign.stop.lock().unwrap();
            *stop = true;
        }
        self.inner.campaign.cv.notify_all();

        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.inner.campaign_active.store(false, Ordering::SeqCst);
        info!("fault campaign stopped");
    }

    /// Latch the emergency flag and halt the campaign.  Never panics;
    /// subsequent injections are blocked until
    /// [`FaultInjector::reset_after_emergency`].
    pub fn emergency_stop(&self) {
        error!("fault injector emergency stop");
        self.inner.emergency_active.store(true, Ordering::SeqCst);
        self.stop_fault_campaign();
    }

    pub fn is_campaign_active(&self) -> bool {
        self.inner.campaign_active.load(Ordering::SeqCst)
    }
}

impl Drop for FaultInjector {
    fn drop(&mut self) {
        self.stop_fault_campaign();
    }
}

fn campaign_loop(inner: &Arc<InjectorInner>, configs: Vec<FaultInjectionConfig>) {
    info!("campaign worker running {} steps", configs.len());

    for config in &configs {
        if *inner.campaign.stop.lock().unwrap()
            || inner.emergency_active.load(Ordering::SeqCst)
        {
            break;
        }

        inner.inject(config, config.fault_type);

        let guard = inner.campaign.stop.lock().unwrap();
        let (guard, _timeout) = inner
            .campaign
            .cv
            .wait_timeout_while(guard, config.injection_period, |stopped| !*stopped)
            .unwrap();
        if *guard {
            break;
        }
    }

    inner.campaign_active.store(false, Ordering::SeqCst);
    info!("campaign worker finished");
}
