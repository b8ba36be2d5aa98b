mod command;
mod driver;
mod runner;
mod session;

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::error::{AppError, AppResult, DistributedError};

pub use driver::{IdleDriver, PhaseProgress, SessionDriver};

/// How an agent process identifies itself and reaches the controller.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub name: String,
    /// Controller agent endpoint, `host:port`.
    pub join: String,
    /// Run the agent was deployed for; routes the hello when set.
    pub run_id: Option<String>,
    /// Keep reconnecting after a run ends instead of exiting.
    pub standby: bool,
    pub reconnect_delay: Duration,
}

impl AgentOptions {
    #[must_use]
    pub fn new(name: impl Into<String>, join: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            join: join.into(),
            run_id: None,
            standby: false,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// Runs the agent loop against a TCP controller endpoint.
///
/// # Errors
///
/// Returns an error if the agent cannot connect, register, or serve a run,
/// unless running in standby mode.
pub async fn run_agent(options: &AgentOptions, driver: &mut dyn SessionDriver) -> AppResult<()> {
    info!(
        "Agent {} starting (standby={}, reconnect={}ms)",
        options.name,
        options.standby,
        options.reconnect_delay.as_millis()
    );

    loop {
        let result = connect_and_serve(options, driver).await;
        match result {
            Ok(()) => {
                if !options.standby {
                    return Ok(());
                }
            }
            Err(err) => {
                if !options.standby {
                    return Err(err);
                }
                warn!("Agent session error: {}", err);
            }
        }
        tokio::time::sleep(options.reconnect_delay).await;
    }
}

async fn connect_and_serve(options: &AgentOptions, driver: &mut dyn SessionDriver) -> AppResult<()> {
    info!("Connecting to controller {}", options.join);
    let stream = TcpStream::connect(&options.join).await.map_err(|err| {
        AppError::distributed(DistributedError::Connection {
            addr: options.join.clone(),
            source: err,
        })
    })?;
    let address = stream
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    info!("Connected to controller {}", options.join);
    session::run_agent_session(stream, address, options, driver).await
}

/// Serves one run over an already established stream, such as an in-process
/// duplex pipe.
///
/// # Errors
///
/// Returns an error if registration fails or the controller goes away
/// before resetting the agent.
pub async fn serve_agent<S>(
    stream: S,
    options: &AgentOptions,
    driver: &mut dyn SessionDriver,
) -> AppResult<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    session::run_agent_session(stream, format!("local:{}", options.name), options, driver).await
}

#[cfg(test)]
mod tests;
