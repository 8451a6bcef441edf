use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    client::ComponentClient, codec::Message, deferred::DeferredCall, error::ClientError,
};

struct ScheduledTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    scheduled: HashMap<String, ScheduledTimer>,
}

/// Schedules deferred calls to run after a delay.
///
/// Timers are identified by name: starting a timer replaces any pending
/// timer with the same name. A handler fired by a timer may re-arm the same
/// name without cutting its own call short. Cloning yields a handle to the same timers.
#[derive(Clone)]
pub struct TimerScheduler {
    client: ComponentClient,
    timers: Arc<Mutex<Timers>>,
}

impl TimerScheduler {
    pub fn new(client: ComponentClient) -> Self {
        Self {
            client,
            timers: Arc::default(),
        }
    }

    /// Executes `call` once after `delay`.
    ///
    /// The call is encoded right away, so an unencodable message fails here
    /// rather than when the timer fires. Must be called within a tokio
    /// runtime.
    pub fn start_single_timer<Req: Message, Res: Message>(
        &self,
        name: impl Into<String>,
        delay: Duration,
        call: DeferredCall<Req, Res>,
    ) -> Result<(), ClientError> {
        let name = name.into();
        let encoded = call.encode(self.client.registry().codec())?;
        let pending = self.client.execute_encoded(Ok(encoded));

        let mut timers = self.lock();
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let registry = Arc::clone(&self.timers);
        let timer_name = name.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Once fired the timer is no longer pending, so a replacement or
            // cancel must not abort the call in flight.
            {
                let mut timers = registry.lock().unwrap_or_else(PoisonError::into_inner);
                if timers
                    .scheduled
                    .get(&timer_name)
                    .is_some_and(|timer| timer.generation == generation)
                {
                    timers.scheduled.remove(&timer_name);
                }
            }

            match pending.await {
                Ok(_) => debug!(timer = %timer_name, "timer fired"),
                Err(err) => warn!(timer = %timer_name, error = %err, "timer call failed"),
            }
        });

        if let Some(previous) = timers
            .scheduled
            .insert(name.clone(), ScheduledTimer { generation, handle })
        {
            debug!(timer = %name, "replacing pending timer");
            previous.handle.abort();
        }

        Ok(())
    }

    /// Cancels a pending timer. Returns whether one was pending.
    ///
    /// A timer whose delay has elapsed is no longer pending: its call runs
    /// to completion.
    pub fn cancel(&self, name: &str) -> bool {
        match self.lock().scheduled.remove(name) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.lock().scheduled.contains_key(name)
    }

    fn lock(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TimerScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.lock().scheduled.keys().cloned().collect();
        f.debug_struct("TimerScheduler")
            .field("scheduled", &names)
            .finish()
    }
}
