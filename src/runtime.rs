// Vehicle runtime: controller bring-up, WebSocket server, graceful shutdown
//
// Bring-up order matters: configuration overrides are validated first, then
// both actuators are configured (failure is fatal, no loop is started), then
// the loops spawn and the server starts accepting. Shutdown runs the other
// way round.

use std::sync::Arc;

use tracing::info;

use crate::config::{
    ConfigRejected, ConfigStore, ConfigurationProvider, DEFAULT_HOST, DEFAULT_PORT, DriveMode, Reconfigure,
};
use crate::dispatcher::vehicle_commands;
use crate::motor::{
    Actuator, ActuatorError, ControllerError, DiscreteDrive, DriveControl, SimActuator, SmoothedDrive,
    SteeringController,
};
use crate::router::Router;
use crate::ws::WsServer;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Configuration rejected: {0}")]
    Config(#[from] ConfigRejected),

    #[error("Actuator initialization failed: {0}")]
    ActuatorInit(#[from] ActuatorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ControllerError> for RuntimeError {
    fn from(e: ControllerError) -> Self {
        match e {
            ControllerError::Actuator(e) => RuntimeError::ActuatorInit(e),
            ControllerError::Spawn(e) => RuntimeError::Io(e),
        }
    }
}

/// Startup options, usually filled from the command line
#[derive(Debug, Clone)]
pub struct Options {
    pub host: String,
    pub port: u16,
    /// `key=value` pairs applied through the configuration store before bring-up
    pub overrides: Vec<(String, String)>,
    pub drive_mode: DriveMode,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            overrides: Vec::new(),
            drive_mode: DriveMode::default(),
        }
    }
}

/// Split a `key=value` override
pub fn parse_override(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.trim().to_string())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

/// A running vehicle: both controllers plus the server feeding them
pub struct Vehicle {
    config: Arc<ConfigStore>,
    drive: Arc<dyn DriveControl>,
    steering: Arc<SteeringController>,
    server: WsServer,
}

impl Vehicle {
    pub fn start(
        options: &Options,
        mut motor_actuator: Box<dyn Actuator>,
        mut steering_actuator: Box<dyn Actuator>,
    ) -> Result<Self, RuntimeError> {
        let config = Arc::new(ConfigStore::default());
        for (key, value) in &options.overrides {
            config.on_update(key, value)?;
        }
        let snapshot = config.snapshot();
        snapshot.log_effective();

        // Both actuators reach neutral before either loop runs
        info!("Configuring drive motors ({:?})", options.drive_mode);
        match options.drive_mode {
            DriveMode::Discrete => DiscreteDrive::bring_up(motor_actuator.as_mut(), &snapshot.motor.pins)?,
            DriveMode::Smoothed => {
                SmoothedDrive::bring_up(motor_actuator.as_mut(), &snapshot.motor.pins)?;
                info!(
                    timeout_ms = snapshot.motor.command_timeout_ms,
                    "Smoothed drive holds its target; motor.command_timeout_ms only applies to --drive-mode discrete"
                );
            }
        }
        info!("Configuring steering servo on pin {}", snapshot.steering.pwm_pin);
        SteeringController::bring_up(
            steering_actuator.as_mut(),
            snapshot.steering.pwm_pin,
            &snapshot.steering_dynamics(),
        )?;

        let (drive, drive_updates): (Arc<dyn DriveControl>, Arc<dyn Reconfigure>) = match options.drive_mode {
            DriveMode::Discrete => {
                let drive = Arc::new(DiscreteDrive::spawn(
                    motor_actuator,
                    snapshot.motor.pins,
                    snapshot.motor_dynamics(),
                )?);
                (drive.clone() as Arc<dyn DriveControl>, drive as Arc<dyn Reconfigure>)
            }
            DriveMode::Smoothed => {
                let drive = Arc::new(SmoothedDrive::spawn(
                    motor_actuator,
                    snapshot.motor.pins,
                    snapshot.motor_dynamics(),
                )?);
                (drive.clone() as Arc<dyn DriveControl>, drive as Arc<dyn Reconfigure>)
            }
        };

        let steering = Arc::new(SteeringController::spawn(
            steering_actuator,
            snapshot.steering.pwm_pin,
            snapshot.steering_dynamics(),
        )?);

        let dispatcher = vehicle_commands(Arc::clone(&drive), Arc::clone(&steering));
        info!("Commands: {:?}", dispatcher);

        let mut router = Router::new(dispatcher, config.clone());
        router.subscribe(drive_updates);
        router.subscribe(steering.clone());

        let server = WsServer::bind((options.host.as_str(), options.port), Arc::new(router))?;
        server.start()?;

        Ok(Self {
            config,
            drive,
            steering,
            server,
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.server.local_addr()
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn drive(&self) -> &Arc<dyn DriveControl> {
        &self.drive
    }

    pub fn steering(&self) -> &Arc<SteeringController> {
        &self.steering
    }

    /// Close sockets, join every loop, leave actuators neutral. Safe to call twice.
    pub fn shutdown(&self) {
        self.server.stop();
        self.drive.shutdown();
        self.steering.shutdown();
    }
}

impl Drop for Vehicle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub async fn run(options: Options) -> Result<(), RuntimeError> {
    // No pin driver is linked in; the simulated bank records what would be written
    let board = SimActuator::new();
    let vehicle = Vehicle::start(&options, Box::new(board.clone()), Box::new(board))?;

    info!("Runtime started on {} (ctrl-c to stop)", vehicle.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping...");
    vehicle.shutdown();
    info!("Shutdown complete");
    Ok(())
}
