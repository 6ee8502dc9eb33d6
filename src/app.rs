//! Service wiring
//!
//! [`App`] builds every SerialKit service from a [`Config`] and connects
//! them: transports into the registry, the script host into the session,
//! the field store onto `user-data`, and console logging onto the data
//! topics.

use chrono::Local;
use serialkit_communication::{
    BluetoothTransport, ConnectionRegistry, NetworkTransport, QuickSender, SerialTransport,
    Session, SimulatedTransport, UsbTransport,
};
use serialkit_core::codec::{format_log_line, LogFormat};
use serialkit_core::{
    thread_safe, BusEvent, EventBus, FieldStore, Scheduler, Subscription, ThreadSafe, Topic,
};
use serialkit_scripting::{ScriptContext, ScriptHost};
use serialkit_settings::Config;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// All services of one SerialKit instance
pub struct App {
    /// Configuration the services were built from
    pub config: Config,
    /// Event bus shared by every service
    pub bus: EventBus,
    /// Timer scheduler, driven by a background task
    pub scheduler: Arc<Scheduler>,
    /// Devices and the active session
    pub registry: ConnectionRegistry,
    /// Current script slot, installed on the session
    pub scripts: Arc<ScriptHost>,
    /// Telemetry fields fed from `user-data`
    pub fields: ThreadSafe<FieldStore>,
    /// Quick-send presets
    pub quick_send: QuickSender,
    driver: JoinHandle<()>,
    subscriptions: Vec<Subscription>,
}

impl App {
    /// Build and wire the services. Must be called inside a tokio runtime.
    pub fn new(config: Config) -> Self {
        let bus = EventBus::new();
        let scheduler = Arc::new(Scheduler::new());
        let driver = scheduler.spawn_driver(config.scheduler_resolution());

        let session = Session::new(bus.clone(), config.pipeline_config());
        let registry = ConnectionRegistry::new(session.clone());
        registry.register_transport(Arc::new(SerialTransport::new()));
        registry.register_transport(Arc::new(UsbTransport::new()));
        registry.register_transport(Arc::new(BluetoothTransport::new(config.scan_duration())));
        registry.register_transport(Arc::new(NetworkTransport::with_endpoints(
            config.network.endpoints.iter().cloned(),
        )));
        if config.simulated.enabled {
            registry.register_transport(Arc::new(SimulatedTransport::with_interval(
                scheduler.clone(),
                config.simulated_interval(),
            )));
        }

        let scripts = ScriptHost::new(ScriptContext::new(
            bus.clone(),
            session.pipeline().clone(),
            scheduler.clone(),
        ));
        scripts.install(&session);

        let fields = thread_safe(FieldStore::with_defaults());
        let quick_send = QuickSender::new(session.pipeline().clone(), scheduler.clone());

        let subscriptions = vec![
            FieldStore::attach(fields.clone(), &bus),
            log_data(&bus, Topic::IncomingData, config.log_format),
            log_data(&bus, Topic::OutgoingData, config.log_format),
            bus.subscribe(Topic::ScriptError, |event| {
                if let BusEvent::ScriptError { message } = event {
                    tracing::warn!("{}", message);
                }
            }),
        ];

        tracing::debug!("Services ready");
        Self {
            config,
            bus,
            scheduler,
            registry,
            scripts,
            fields,
            quick_send,
            driver,
            subscriptions,
        }
    }

    /// Enumerate devices on every transport
    pub async fn discover(&self) -> usize {
        self.registry.discover().await
    }

    /// Connect to a registered device with the configured line settings
    pub async fn connect(&self, device_id: &str) -> serialkit_core::Result<()> {
        self.registry.connect(device_id, &self.config.serial).await
    }

    /// The session owned by the registry
    pub fn session(&self) -> &Session {
        self.registry.session()
    }

    /// Stop the script, close the connection and halt every timer
    pub async fn shutdown(self) -> serialkit_core::Result<()> {
        self.scripts.stop();
        let result = self.registry.disconnect().await;
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        self.scheduler.clear_all();
        self.driver.abort();
        tracing::info!("Shut down");
        result
    }
}

fn log_data(bus: &EventBus, topic: Topic, format: LogFormat) -> Subscription {
    bus.subscribe(topic, move |event| match event {
        BusEvent::IncomingData { raw, .. } => {
            tracing::info!("RX {}", format_log_line(raw, &format, Local::now()).trim_end());
        }
        BusEvent::OutgoingData { raw } => {
            tracing::info!("TX {}", format_log_line(raw, &format, Local::now()).trim_end());
        }
        _ => {}
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialkit_communication::communication::simulated::SIMULATED_DEVICE_ID;
    use serialkit_scripting::IMU_DEMO;
    use tokio::time::Duration;

    fn offline_config() -> Config {
        let mut config = Config::default();
        config.network.endpoints = vec!["127.0.0.1:9".to_string()];
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_telemetry_reaches_field_store() {
        let app = App::new(offline_config());
        app.registry
            .insert(serialkit_communication::communication::simulated::make_device());
        app.scripts.run("imu", IMU_DEMO).unwrap();
        app.connect(SIMULATED_DEVICE_ID).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        {
            let fields = app.fields.lock();
            let pitch = fields.get("pitch").unwrap();
            assert!(pitch.update_count > 1);
        }

        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_simulated_can_be_disabled() {
        let mut config = offline_config();
        config.simulated.enabled = false;
        let app = App::new(config);
        app.registry
            .insert(serialkit_communication::communication::simulated::make_device());
        assert!(app.connect(SIMULATED_DEVICE_ID).await.is_err());
        app.shutdown().await.unwrap();
    }
}
