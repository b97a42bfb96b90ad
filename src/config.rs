//! Engine configurations.
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use strum::{Display, EnumString};

use crate::error::{Error, Result};
use crate::models::L3;
use crate::timestamp::DEFAULT_PAYLOAD_SIZE;

/// Read deadline used when none is configured.
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(1);

/// Address family requested by the user.
#[derive(Copy, Clone, Debug, Default, Display, EnumString, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum AddressFamily {
    /// Select automatically.
    #[default]
    Ip,
    Ip4,
    Ip6,
}

impl AddressFamily {
    pub fn accepts(&self, l3_protocol: L3) -> bool {
        match self {
            AddressFamily::Ip => true,
            AddressFamily::Ip4 => l3_protocol == L3::IPv4,
            AddressFamily::Ip6 => l3_protocol == L3::IPv6,
        }
    }
}

impl From<L3> for AddressFamily {
    fn from(value: L3) -> Self {
        match value {
            L3::IPv4 => AddressFamily::Ip4,
            L3::IPv6 => AddressFamily::Ip6,
        }
    }
}

/// Hop discovery probe method.
#[derive(Copy, Clone, Debug, Default, Display, EnumString, PartialEq, Eq)]
#[strum(serialize_all = "kebab-case")]
pub enum ProbeMethod {
    /// UDP probes starting at port 33434.
    #[default]
    Default,
    Icmp,
    /// UDP probes starting at port 53.
    Udp,
    Tcp,
    TcpHalfOpen,
}

/// Parse a configuration keyword such as `ip6` or `tcp-half-open`.
///
/// ```
/// use netprobe::config::{parse_keyword, ProbeMethod};
///
/// let method: ProbeMethod = parse_keyword("tcp-half-open").unwrap();
/// assert_eq!(method, ProbeMethod::TcpHalfOpen);
/// assert!(parse_keyword::<ProbeMethod>("sctp").is_err());
/// ```
pub fn parse_keyword<T: FromStr>(value: &str) -> Result<T> {
    T::from_str(value).map_err(|_| Error::BadConfig(format!("unsupported value {value:?}")))
}

/// Echo prober configuration.
#[derive(Clone, Debug)]
pub struct PingConfig {
    /// Host name or IP address of the target.
    pub target: String,
    /// Number of echo requests to send (unlimited by default).
    pub count: Option<u64>,
    /// Time between two echo requests.
    pub interval: Duration,
    /// Interface whose address is used as the source address.
    pub interface: Option<String>,
    /// TTL or hop limit of the echo requests.
    pub ttl: u8,
    pub family: AddressFamily,
    /// Use datagram ICMP sockets, which do not require privileges.
    pub unprivileged: bool,
    /// Stop sending after this long since the first echo request.
    pub timeout: Option<Duration>,
    /// Per-operation socket deadline.
    pub deadline: Option<Duration>,
    /// Echo payload size in bytes, timestamp included.
    pub payload_size: usize,
    /// Only print the summary.
    pub quiet: bool,
    /// Prefix each result line with the Unix time.
    pub timestamp: bool,
    /// Log the live statistics at this interval.
    pub statistics_interval: Option<Duration>,
}

impl Default for PingConfig {
    fn default() -> Self {
        PingConfig {
            target: String::new(),
            count: None,
            interval: Duration::from_secs(1),
            interface: None,
            ttl: 64,
            family: AddressFamily::Ip,
            unprivileged: false,
            timeout: None,
            deadline: Some(DEFAULT_READ_DEADLINE),
            payload_size: DEFAULT_PAYLOAD_SIZE,
            quiet: false,
            timestamp: false,
            statistics_interval: None,
        }
    }
}

impl PingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target.is_empty() {
            return Err(Error::BadConfig("target address must be specified".into()));
        }
        if self.ttl == 0 {
            return Err(Error::BadConfig("ttl must be at least 1".into()));
        }
        if self.interval.is_zero() {
            return Err(Error::BadConfig("interval must be positive".into()));
        }
        Ok(())
    }

    pub fn read_deadline(&self) -> Duration {
        self.deadline.unwrap_or(DEFAULT_READ_DEADLINE)
    }
}

impl Display for PingConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "target={:?}", self.target)?;
        write!(f, " count={:?}", self.count)?;
        write!(f, " interval={:?}", self.interval)?;
        write!(f, " interface={:?}", self.interface)?;
        write!(f, " ttl={}", self.ttl)?;
        write!(f, " family={}", self.family)?;
        write!(f, " unprivileged={}", self.unprivileged)?;
        write!(f, " timeout={:?}", self.timeout)?;
        write!(f, " deadline={:?}", self.deadline)?;
        write!(f, " payload_size={}", self.payload_size)
    }
}

/// Hop discovery configuration.
#[derive(Clone, Debug)]
pub struct TraceConfig {
    /// Host name or IP address of the destination.
    pub target: String,
    pub family: AddressFamily,
    pub method: ProbeMethod,
    /// TTL of the first hop to probe.
    pub first_ttl: u8,
    /// Maximum number of hops to probe.
    pub max_ttl: u8,
    /// Number of probes that may be unresolved at the same time.
    pub sim_queries: usize,
    /// Number of probes per hop.
    pub queries: usize,
    /// First destination port (or ICMP sequence), depends on the method by default.
    pub port: Option<u16>,
    /// Time to wait for the reply to a probe.
    pub wait_time: Duration,
    /// Time between two probes.
    pub send_wait: Duration,
    /// Use datagram ICMP sockets, which do not require privileges.
    pub unprivileged: bool,
    /// Connect timeout of the TCP full connect probes.
    pub connect_timeout: Duration,
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            target: String::new(),
            family: AddressFamily::Ip,
            method: ProbeMethod::Default,
            first_ttl: 1,
            max_ttl: 30,
            sim_queries: 3,
            queries: 3,
            port: None,
            wait_time: Duration::from_secs(5),
            send_wait: Duration::from_millis(100),
            unprivileged: false,
            connect_timeout: Duration::from_millis(500),
        }
    }
}

impl TraceConfig {
    /// First destination identity: the explicit port, else 53 for UDP probes
    /// and 33434 otherwise, ICMP sequence numbers included.
    pub fn start_identity(&self) -> u16 {
        self.port.unwrap_or(match self.method {
            ProbeMethod::Udp => 53,
            _ => 33434,
        })
    }

    /// Number of hops that may be unresolved at the same time.
    pub fn hop_window(&self) -> usize {
        (self.sim_queries / self.queries.max(1)).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.is_empty() {
            return Err(Error::BadConfig("target address must be specified".into()));
        }
        if self.first_ttl == 0 {
            return Err(Error::BadConfig("first ttl must be at least 1".into()));
        }
        if self.first_ttl > self.max_ttl {
            return Err(Error::BadConfig(format!(
                "first ttl {} is greater than max ttl {}",
                self.first_ttl, self.max_ttl
            )));
        }
        if self.queries == 0 {
            return Err(Error::BadConfig("at least one probe per hop is required".into()));
        }
        let last_identity = self.start_identity() as usize + self.max_ttl as usize * self.queries - 1;
        if last_identity > u16::MAX as usize {
            return Err(Error::BadConfig(format!(
                "port range starting at {} does not fit {} hops of {} probes",
                self.start_identity(),
                self.max_ttl,
                self.queries
            )));
        }
        Ok(())
    }
}

impl Display for TraceConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "target={:?}", self.target)?;
        write!(f, " family={}", self.family)?;
        write!(f, " method={}", self.method)?;
        write!(f, " first_ttl={}", self.first_ttl)?;
        write!(f, " max_ttl={}", self.max_ttl)?;
        write!(f, " sim_queries={}", self.sim_queries)?;
        write!(f, " queries={}", self.queries)?;
        write!(f, " start_identity={}", self.start_identity())?;
        write!(f, " wait_time={:?}", self.wait_time)?;
        write!(f, " send_wait={:?}", self.send_wait)?;
        write!(f, " unprivileged={}", self.unprivileged)
    }
}
