use crate::client::RespeakerClient;
use crate::error::{CommandError, ConnectError};
use crate::field::Field;
use crate::worker::{StopSignal, Worker};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use respeaker_types::ParameterDescriptor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;
const UNRESPONSIVE: &str = "device unresponsive, please replug";
const NOT_FOUND: &str = "device not found, check it is plugged in";

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub poll_interval: Duration,

    // How long stop_polling waits for an in-flight pass to finish.
    pub stop_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            stop_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ServiceEvent {
    Connected,
    Disconnected,
    Error(String),
    Polled,
}

struct Registration {
    field: Arc<Field>,
    descriptor: ParameterDescriptor,

    // Set while the poll loop stores a device value, so the change isn't written back.
    silent: AtomicBool,
}

struct ServiceInner {
    client: Arc<RespeakerClient>,
    config: ServiceConfig,
    registrations: RwLock<Vec<Arc<Registration>>>,
    events: broadcast::Sender<ServiceEvent>,
    poller: Mutex<Option<Worker>>,
}

impl ServiceInner {
    fn emit(&self, event: ServiceEvent) {
        // A send only fails when nobody is subscribed.
        let _ = self.events.send(event);
    }

    fn write_back(&self, registration: &Registration, value: f64) {
        if registration.silent.load(Ordering::Acquire) {
            return;
        }

        debug!("Writing {} = {}", registration.field.name(), value);
        if let Err(error) = self
            .client
            .write_parameter(&registration.descriptor, value)
        {
            warn!("Unable to write {}: {}", registration.field.name(), error);
            self.emit(ServiceEvent::Error(format!(
                "Unable to write {}: {}",
                registration.field.name(),
                error
            )));
        }
    }

    fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.is_finished() && !worker.is_stopping())
    }

    fn start_polling(self: &Arc<Self>) -> Result<(), CommandError> {
        let mut poller = self.poller.lock();
        if let Some(worker) = poller.as_ref() {
            if !worker.is_finished() && !worker.is_stopping() {
                return Ok(());
            }
        }

        let inner = Arc::downgrade(self);
        let interval = self.config.poll_interval;
        *poller = Some(Worker::spawn("respeaker-poll", move |stop| {
            poll_loop(inner, stop, interval)
        })?);

        debug!("Polling started, every {:?}", interval);
        Ok(())
    }

    fn stop_polling(&self) {
        // Take the worker out first, the poll thread may need this lock while tearing down.
        let worker = self.poller.lock().take();
        if let Some(mut worker) = worker {
            worker.stop();
            if !worker.is_current() && !worker.join(self.config.stop_timeout) {
                warn!(
                    "Poll thread did not stop within {:?}",
                    self.config.stop_timeout
                );
            }
        }
    }

    fn disconnect(&self) {
        self.stop_polling();
        if self.client.is_connected() {
            self.client.disconnect();
            self.emit(ServiceEvent::Disconnected);
        }
    }

    // Reads every registration once. Returns false when the loop should end.
    fn poll_once(&self, stop: &StopSignal) -> bool {
        let registrations = self.registrations.read().clone();

        for registration in registrations {
            if stop.is_triggered() {
                return false;
            }

            match self.client.read_parameter(&registration.descriptor) {
                Ok(value) => {
                    registration.silent.store(true, Ordering::Release);
                    registration.field.set(value);
                    registration.silent.store(false, Ordering::Release);
                }
                Err(err) => {
                    // A failure caused by a deliberate shutdown isn't worth reporting.
                    if stop.is_triggered() {
                        return false;
                    }

                    error!(
                        "Polling {} failed, disconnecting: {}",
                        registration.field.name(),
                        err
                    );
                    self.emit(ServiceEvent::Error(format!(
                        "Unable to read {}: {}",
                        registration.field.name(),
                        err
                    )));
                    self.disconnect();
                    return false;
                }
            }
        }

        self.emit(ServiceEvent::Polled);
        true
    }
}

fn connect_failure(error: &ConnectError) -> String {
    match error {
        ConnectError::DeviceNotFound => NOT_FOUND.to_string(),
        ConnectError::MultipleDevicesFound(count) => {
            format!("{count} devices found, unplug all but one")
        }
        error => format!("unable to open device ({error}), please replug"),
    }
}

fn poll_loop(inner: Weak<ServiceInner>, stop: Arc<StopSignal>, interval: Duration) {
    loop {
        if stop.is_triggered() {
            break;
        }

        let Some(service) = inner.upgrade() else {
            break;
        };
        if !service.poll_once(&stop) {
            break;
        }
        drop(service);

        if stop.wait(interval) {
            break;
        }
    }
    debug!("Poll loop finished");
}

/// Keeps a set of [`Field`]s mirrored with the device.
///
/// While connected, a background thread reads every registered parameter on each poll
/// interval and stores the result in its field. Changes made to a read-write field from
/// anywhere else are written to the device.
pub struct RespeakerService {
    inner: Arc<ServiceInner>,
}

impl RespeakerService {
    pub fn new(client: Arc<RespeakerClient>, config: ServiceConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ServiceInner {
                client,
                config,
                registrations: RwLock::new(vec![]),
                events,
                poller: Mutex::new(None),
            }),
        }
    }

    pub fn client(&self) -> &Arc<RespeakerClient> {
        &self.inner.client
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.client.is_connected()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.is_polling()
    }

    pub fn register(
        &self,
        bindings: impl IntoIterator<Item = (Arc<Field>, ParameterDescriptor)>,
    ) -> Result<(), CommandError> {
        for (field, descriptor) in bindings {
            let registration = Arc::new(Registration {
                field: field.clone(),
                descriptor,
                silent: AtomicBool::new(false),
            });

            if descriptor.is_writable() {
                let weak_registration = Arc::downgrade(&registration);
                let weak_inner = Arc::downgrade(&self.inner);
                field.on_change(move |value| {
                    if let (Some(registration), Some(inner)) =
                        (weak_registration.upgrade(), weak_inner.upgrade())
                    {
                        inner.write_back(&registration, value);
                    }
                });
            }

            debug!("Registered {} at {}", field.name(), descriptor);
            self.inner.registrations.write().push(registration);
        }

        if self.inner.client.is_connected() {
            self.inner.start_polling()?;
        }
        Ok(())
    }

    pub fn connect(&self) -> Result<(), ConnectError> {
        let inner = &self.inner;
        if inner.client.is_connected() {
            return Ok(());
        }
        if let Err(error) = inner.client.connect() {
            warn!("Unable to connect: {}", error);
            inner.emit(ServiceEvent::Error(connect_failure(&error)));
            return Err(error);
        }

        let first = inner.registrations.read().first().cloned();
        if let Some(first) = &first {
            if let Err(error) = inner.client.read_parameter(&first.descriptor) {
                warn!("No response from {}: {}", first.field.name(), error);
                inner.emit(ServiceEvent::Error(UNRESPONSIVE.to_string()));
                inner.client.disconnect();
                return Err(ConnectError::Unresponsive(error));
            }
        }

        info!("ReSpeaker service connected");
        inner.emit(ServiceEvent::Connected);

        if first.is_some() {
            inner.start_polling()?;
        }
        Ok(())
    }

    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    pub fn start_polling(&self) -> Result<(), CommandError> {
        self.inner.start_polling()
    }

    /// Stops the poll thread, waiting a bounded time for it to exit. Safe to call from
    /// the poll thread itself.
    pub fn stop_polling(&self) {
        self.inner.stop_polling();
    }

    pub fn close(&self) {
        self.disconnect();
    }
}

impl Drop for RespeakerService {
    fn drop(&mut self) {
        self.close();
    }
}
