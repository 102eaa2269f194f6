//! A device under test and the sessions that reach it.
//!
//! The console is the only endpoint known up front. The host OS and management
//! controller addresses are discovered through it before direct sessions open.

mod config;

pub use config::{Account, Accounts, ConsoleAddress, DutConfig};

use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;

use log::{info, warn};

use crate::error::{Result, SessionError};
use crate::queries;
use crate::session::{ConsoleSession, Session, SessionState, ShellRole, ShellSession};
use crate::transport::{
    Connector, Credential, Endpoint, ExecConnector, HostKeyVerification, SshConfig, SshConnector,
};

/// Turns endpoints and credentials into connectors.
pub trait Dialer: Send + Sync {
    type Console: Connector;
    type Shell: ExecConnector;

    fn console(&self, endpoint: Endpoint, credential: Credential) -> Self::Console;
    fn shell(&self, endpoint: Endpoint, credential: Credential) -> Self::Shell;
}

/// Dials everything over SSH.
#[derive(Debug, Clone, Default)]
pub struct SshDialer {
    host_key_verification: HostKeyVerification,
}

impl SshDialer {
    pub fn new(host_key_verification: HostKeyVerification) -> Self {
        Self {
            host_key_verification,
        }
    }

    fn connector(&self, endpoint: Endpoint, credential: Credential) -> SshConnector {
        let mut config = SshConfig::new(endpoint, credential);
        config.host_key_verification = self.host_key_verification.clone();
        SshConnector::new(config)
    }
}

impl Dialer for SshDialer {
    type Console = SshConnector;
    type Shell = SshConnector;

    fn console(&self, endpoint: Endpoint, credential: Credential) -> SshConnector {
        self.connector(endpoint, credential)
    }

    fn shell(&self, endpoint: Endpoint, credential: Credential) -> SshConnector {
        self.connector(endpoint, credential)
    }
}

/// One device: its console plus the host and management sessions found through it.
///
/// # Example
///
/// ```rust,no_run
/// use dutshell::dut::SystemUnderTest;
/// use dutshell::session::Session;
///
/// # async fn example() -> Result<(), dutshell::Error> {
/// let mut dut = SystemUnderTest::from_path("dut.json")?;
/// dut.connect_all().await?;
///
/// if let Some(host) = dut.host() {
///     println!("{}", host.execute("uname -r").await?);
/// }
/// dut.disconnect_all().await?;
/// # Ok(())
/// # }
/// ```
pub struct SystemUnderTest<D: Dialer = SshDialer> {
    config: DutConfig,
    dialer: D,
    console: Option<ConsoleSession<D::Console>>,
    host: Option<ShellSession<D::Shell>>,
    bmc: Option<ShellSession<D::Shell>>,
    host_ip: Option<Ipv4Addr>,
    bmc_ip: Option<Ipv4Addr>,
}

impl SystemUnderTest<SshDialer> {
    /// Registry dialing over SSH; nothing connects yet.
    pub fn new(config: DutConfig) -> Result<Self> {
        let verification = if config.strict_host_keys {
            HostKeyVerification::AcceptNew
        } else {
            HostKeyVerification::Disabled
        };
        Self::with_dialer(config, SshDialer::new(verification))
    }

    /// Load a JSON device description.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(DutConfig::from_path(path)?)
    }
}

impl<D: Dialer> SystemUnderTest<D> {
    pub fn with_dialer(config: DutConfig, dialer: D) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            dialer,
            console: None,
            host: None,
            bmc: None,
            host_ip: None,
            bmc_ip: None,
        })
    }

    pub fn config(&self) -> &DutConfig {
        &self.config
    }

    pub fn platform(&self) -> &str {
        &self.config.platform
    }

    pub fn sku(&self) -> &str {
        &self.config.sku
    }

    /// Discovered host OS address.
    pub fn host_ip(&self) -> Option<Ipv4Addr> {
        self.host_ip
    }

    /// Discovered management controller address.
    pub fn bmc_ip(&self) -> Option<Ipv4Addr> {
        self.bmc_ip
    }

    pub fn console(&mut self) -> Option<&mut ConsoleSession<D::Console>> {
        self.console.as_mut()
    }

    pub fn host(&mut self) -> Option<&mut ShellSession<D::Shell>> {
        self.host.as_mut()
    }

    pub fn bmc(&mut self) -> Option<&mut ShellSession<D::Shell>> {
        self.bmc.as_mut()
    }

    /// Open the console session and log in. A no-op when already connected; a
    /// faulted console is reset first.
    pub async fn connect_console(&mut self) -> Result<()> {
        let console = match &mut self.console {
            Some(console) => console,
            slot => {
                let accounts = &self.config.accounts;
                let connector = self
                    .dialer
                    .console(self.config.console_endpoint(), accounts.console.credential());
                slot.insert(ConsoleSession::new(
                    connector,
                    accounts.device.credential(),
                    self.config.session.clone(),
                )?)
            }
        };

        match console.state() {
            SessionState::Connected => Ok(()),
            SessionState::Faulted => {
                console.disconnect().await?;
                console.connect().await
            }
            _ => console.connect().await,
        }
    }

    fn connected_console(&mut self) -> Result<&mut ConsoleSession<D::Console>> {
        self.console
            .as_mut()
            .filter(|c| c.is_connected())
            .ok_or_else(|| SessionError::NotConnected.into())
    }

    /// Read the host OS address over the console.
    pub async fn update_host_ip(&mut self) -> Result<Ipv4Addr> {
        let ip = queries::host_ip(self.connected_console()?).await?;
        self.host_ip = Some(ip);
        Ok(ip)
    }

    /// Read the management controller address over the console.
    pub async fn update_bmc_ip(&mut self) -> Result<Ipv4Addr> {
        let ip = queries::management_ip(self.connected_console()?).await?;
        self.bmc_ip = Some(ip);
        Ok(ip)
    }

    /// Discover both direct-session addresses.
    pub async fn discover(&mut self) -> Result<()> {
        self.update_host_ip().await?;
        self.update_bmc_ip().await?;
        Ok(())
    }

    /// Open the host OS session at the discovered address.
    pub async fn connect_host(&mut self) -> Result<()> {
        let ip = self
            .host_ip
            .ok_or(SessionError::NotDiscovered { endpoint: "host" })?;
        let credential = self.config.accounts.host.credential();
        Self::open_shell(
            &self.dialer,
            &mut self.host,
            ip,
            credential,
            ShellRole::Host,
            &self.config,
        )
        .await
    }

    /// Open the management controller session at the discovered address.
    pub async fn connect_bmc(&mut self) -> Result<()> {
        let ip = self
            .bmc_ip
            .ok_or(SessionError::NotDiscovered { endpoint: "bmc" })?;
        let credential = self.config.accounts.bmc.credential();
        Self::open_shell(
            &self.dialer,
            &mut self.bmc,
            ip,
            credential,
            ShellRole::Management,
            &self.config,
        )
        .await
    }

    async fn open_shell(
        dialer: &D,
        slot: &mut Option<ShellSession<D::Shell>>,
        ip: Ipv4Addr,
        credential: Credential,
        role: ShellRole,
        config: &DutConfig,
    ) -> Result<()> {
        if slot.as_ref().is_some_and(|s| s.is_connected()) {
            return Ok(());
        }
        let connector = dialer.shell(Endpoint::direct(ip.to_string()), credential);
        let session = slot.insert(ShellSession::new(connector, role, config.session.clone())?);
        session.connect().await
    }

    /// Console, discovery, then both direct sessions. Stops at the first failure.
    pub async fn connect_all(&mut self) -> Result<()> {
        info!("Connecting to {}", self);
        self.connect_console().await?;
        self.discover().await?;
        self.connect_host().await?;
        self.connect_bmc().await?;
        Ok(())
    }

    /// Disconnect every open session. Attempts all of them; returns the first error.
    pub async fn disconnect_all(&mut self) -> Result<()> {
        let mut first_error = None;

        if let Some(bmc) = self.bmc.as_mut() {
            if let Err(e) = bmc.disconnect().await {
                warn!("bmc disconnect failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        if let Some(host) = self.host.as_mut() {
            if let Err(e) = host.disconnect().await {
                warn!("host disconnect failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        if let Some(console) = self.console.as_mut() {
            if let Err(e) = console.disconnect().await {
                warn!("console disconnect failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<D: Dialer> fmt::Display for SystemUnderTest<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn ip(addr: Option<Ipv4Addr>) -> String {
            addr.map_or_else(|| "-".to_string(), |a| a.to_string())
        }
        write!(
            f,
            "{} ({}) console {} host {} bmc {}",
            self.config.platform,
            self.config.sku,
            self.config.console_endpoint(),
            ip(self.host_ip),
            ip(self.bmc_ip)
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::io::DuplexStream;

    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{
        FakeExecConnector, LoopbackConnector, PASSWORD, Reply, console_device, stdout,
    };

    struct FakeDialer {
        consoles: Mutex<Vec<DuplexStream>>,
        dialed: Arc<Mutex<Vec<String>>>,
    }

    impl Dialer for FakeDialer {
        type Console = LoopbackConnector;
        type Shell = FakeExecConnector;

        fn console(&self, _endpoint: Endpoint, _credential: Credential) -> LoopbackConnector {
            LoopbackConnector::new(std::mem::take(&mut *self.consoles.lock().unwrap()))
        }

        fn shell(&self, endpoint: Endpoint, credential: Credential) -> FakeExecConnector {
            let target = format!("{}@{}", credential.username(), endpoint);
            self.dialed.lock().unwrap().push(target.clone());
            FakeExecConnector::new(target, |cmd| match cmd {
                "hostname" => stdout("ubuntu\n"),
                _ => None,
            })
        }
    }

    fn lab_console() -> DuplexStream {
        console_device(1, |line| match line {
            "ip r" => Reply::output(
                line,
                "default via 10.58.1.1 dev eno1\r\n10.58.1.0/24 dev eno1 proto kernel scope link src 10.58.1.20",
            ),
            "ipmitool lan print" => Reply::output(
                line,
                "IP Address Source       : DHCP Address\r\nIP Address              : 10.58.1.21",
            ),
            other => Reply::output(other, ""),
        })
    }

    fn dut(consoles: Vec<DuplexStream>) -> (SystemUnderTest<FakeDialer>, Arc<Mutex<Vec<String>>>) {
        let mut config = DutConfig::from_json(
            r#"{ "platform": "S9600-72XC", "sku": "x86-d-2187nt",
                 "console_ip": { "ip": "192.168.162.2", "port": 5102 } }"#,
        )
        .unwrap();
        config.accounts.device = Account::new("root", PASSWORD);
        config.session = crate::testing::quick_config();

        let dialed = Arc::new(Mutex::new(Vec::new()));
        let dialer = FakeDialer {
            consoles: Mutex::new(consoles),
            dialed: dialed.clone(),
        };
        (SystemUnderTest::with_dialer(config, dialer).unwrap(), dialed)
    }

    #[tokio::test]
    async fn test_direct_sessions_need_discovery() {
        let (mut dut, dialed) = dut(Vec::new());

        let err = dut.connect_host().await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Session(SessionError::NotDiscovered { endpoint: "host" })
        ));
        let err = dut.connect_bmc().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert!(dialed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_needs_console() {
        let (mut dut, _) = dut(Vec::new());
        let err = dut.update_host_ip().await.unwrap_err();
        assert!(matches!(err, crate::Error::Session(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_all_discovers_and_dials() {
        let (mut dut, dialed) = dut(vec![lab_console()]);
        assert_eq!(
            dut.to_string(),
            "S9600-72XC (x86-d-2187nt) console 192.168.162.2:5102 host - bmc -"
        );

        dut.connect_all().await.unwrap();
        assert_eq!(dut.host_ip(), Some(Ipv4Addr::new(10, 58, 1, 20)));
        assert_eq!(dut.bmc_ip(), Some(Ipv4Addr::new(10, 58, 1, 21)));
        assert_eq!(
            *dialed.lock().unwrap(),
            vec!["root@10.58.1.20:22".to_string(), "sysadmin@10.58.1.21:22".to_string()]
        );
        assert!(dut.to_string().ends_with("host 10.58.1.20 bmc 10.58.1.21"));

        let host = dut.host().unwrap();
        assert_eq!(host.role(), ShellRole::Host);
        assert_eq!(host.execute("hostname").await.unwrap().stdout, "ubuntu\n");
        assert_eq!(dut.bmc().unwrap().role(), ShellRole::Management);

        // Already connected: nothing is re-dialed.
        dut.connect_console().await.unwrap();
        dut.connect_host().await.unwrap();
        assert_eq!(dialed.lock().unwrap().len(), 2);

        dut.disconnect_all().await.unwrap();
        assert_eq!(dut.console().unwrap().state(), SessionState::Disconnected);
        assert_eq!(dut.host().unwrap().state(), SessionState::Disconnected);
        assert_eq!(dut.bmc().unwrap().state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_all_without_sessions() {
        let (mut dut, _) = dut(Vec::new());
        dut.disconnect_all().await.unwrap();
    }
}
