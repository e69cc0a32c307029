use std::{cell::RefCell, rc::Weak, time::Duration};

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

use crate::config::HostConfig;
use crate::instance::Instance;

pub fn drain_period(config: &HostConfig) -> Duration {
    Duration::from_millis(config.drain_interval_ms.max(1))
}

/// Periodically delivers port notifications and idles the editor on the
/// current `LocalSet`. The task ends once the instance is dropped.
pub fn spawn_port_event_drain(instance: Weak<RefCell<Instance>>, period: Duration) -> JoinHandle<()> {
    let period = period.max(Duration::from_millis(1));
    tokio::task::spawn_local(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(strong) = instance.upgrade() else {
                debug!("Instance dropped, stopping port event drain");
                break;
            };
            // Skip a tick rather than panic if the instance is borrowed elsewhere.
            let Ok(mut guard) = strong.try_borrow_mut() else {
                continue;
            };
            guard.send_port_events();
            guard.idle_editor();
        }
    })
}
