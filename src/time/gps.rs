use std::future::Future;
use std::time::Duration;

use chrono::DateTime;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::core::{Error, GpsConfig, MissingFieldPolicy, Result, SharedState};
use crate::poll::{collect_writes, publish, Fields, Poller};
use crate::registry::VarId;

use super::GPS_FIELDS;

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true};\n";
const POLL_COMMAND: &[u8] = b"?POLL;\n";

/// Query capability of a positioning daemon
pub trait GpsQuery: Send + 'static {
    /// Opens the daemon connection
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Fetches the current fix as `name=value` fields (see [`GPS_FIELDS`])
    fn poll(&mut self) -> impl Future<Output = Result<Fields>> + Send;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    class: String,
}

#[derive(Debug, Default, Deserialize)]
struct PollReport {
    #[serde(default)]
    tpv: Vec<Tpv>,
    #[serde(default)]
    sky: Vec<Sky>,
}

#[derive(Debug, Default, Deserialize)]
struct Tpv {
    mode: Option<u8>,
    time: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    alt: Option<f64>,
    #[serde(rename = "altMSL")]
    alt_msl: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct Sky {
    #[serde(rename = "uSat")]
    u_sat: Option<u32>,
    #[serde(default)]
    satellites: Vec<Satellite>,
}

#[derive(Debug, Default, Deserialize)]
struct Satellite {
    #[serde(default)]
    used: bool,
}

/// Converts a gpsd `POLL` object into fields.
///
/// The device with the best fix mode is reported. Values gpsd leaves out
/// (no fix yet) are left out of the fields as well.
fn report_fields(line: &str) -> Result<Fields> {
    let report: PollReport = serde_json::from_str(line)
        .map_err(|e| Error::parse(format!("gpsd POLL report: {}", e)))?;

    let mut fields = Fields::new();
    let Some(tpv) = report.tpv.iter().max_by_key(|t| t.mode.unwrap_or(0)) else {
        return Ok(fields);
    };

    if let Some(mode) = tpv.mode {
        fields.insert("mode", mode.to_string());
    }
    if let Some(time) = &tpv.time {
        match DateTime::parse_from_rfc3339(time) {
            Ok(t) if t.timestamp() >= 0 => fields.insert("time", t.timestamp().to_string()),
            _ => warn!(time = %time, "Unusable fix time"),
        }
    }
    if let Some(lat) = tpv.lat {
        fields.insert("latitude", lat.to_string());
    }
    if let Some(lon) = tpv.lon {
        fields.insert("longitude", lon.to_string());
    }
    if let Some(alt) = tpv.alt_msl.or(tpv.alt) {
        fields.insert("altitude", alt.to_string());
    }

    let used = report.sky.first().map(|sky| {
        sky.u_sat
            .unwrap_or_else(|| sky.satellites.iter().filter(|s| s.used).count() as u32)
    });
    if let Some(used) = used {
        fields.insert("satellites_used", used.min(u8::MAX as u32).to_string());
    }
    Ok(fields)
}

/// gpsd JSON protocol client
pub struct GpsdClient {
    address: String,
    timeout: Duration,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
}

impl GpsdClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        GpsdClient {
            address: address.into(),
            timeout,
            reader: None,
            writer: None,
        }
    }

    fn disconnect(&mut self) {
        self.reader = None;
        self.writer = None;
    }

    async fn send(&mut self, command: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::daemon("gpsd connection not open"))?;
        writer.write_all(command).await?;
        Ok(())
    }

    /// Reads lines until one of `class`, returning it
    async fn read_class(&mut self, class: &str) -> Result<String> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::daemon("gpsd connection not open"))?;

        let wait = async {
            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).await? == 0 {
                    return Err(Error::daemon("gpsd closed the connection"));
                }
                match serde_json::from_str::<Envelope>(&line) {
                    Ok(envelope) if envelope.class == class => return Ok(line.trim_end().to_string()),
                    Ok(envelope) => trace!(class = %envelope.class, "Skipping gpsd report"),
                    Err(e) => debug!(error = %e, "Skipping malformed gpsd line"),
                }
            }
        };

        tokio::time::timeout(self.timeout, wait)
            .await
            .map_err(|_| Error::daemon(format!("no {} report from gpsd", class)))?
    }

    async fn exchange(&mut self) -> Result<Fields> {
        self.send(POLL_COMMAND).await?;
        let line = self.read_class("POLL").await?;
        report_fields(&line)
    }
}

impl GpsQuery for GpsdClient {
    async fn connect(&mut self) -> Result<()> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(self.address.as_str()))
            .await
            .map_err(|_| Error::daemon(format!("gpsd at {} not answering", self.address)))??;

        let (read, write) = stream.into_split();
        self.reader = Some(BufReader::new(read));
        self.writer = Some(write);

        let watch = async {
            self.send(WATCH_COMMAND).await?;
            self.read_class("WATCH").await
        };
        if let Err(e) = watch.await {
            self.disconnect();
            return Err(e);
        }
        info!(daemon = %self.address, "gpsd watch enabled");
        Ok(())
    }

    async fn poll(&mut self) -> Result<Fields> {
        if self.writer.is_none() {
            self.connect().await?;
        }
        let result = self.exchange().await;
        if result.is_err() {
            self.disconnect();
        }
        result
    }
}

/// Publishes the positioning daemon's current fix
pub struct GpsPoller<G> {
    client: G,
    ids: Vec<VarId>,
    policy: MissingFieldPolicy,
    interval: Duration,
}

impl<G: GpsQuery> GpsPoller<G> {
    /// `ids` are the slots registered for [`GPS_FIELDS`], in order
    pub fn new(client: G, ids: Vec<VarId>, config: &GpsConfig) -> Self {
        GpsPoller {
            client,
            ids,
            policy: config.missing_field,
            interval: config.interval,
        }
    }
}

impl<G: GpsQuery> Poller for GpsPoller<G> {
    fn name(&self) -> &'static str {
        "gps"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn init(&mut self) -> Result<()> {
        self.client.connect().await
    }

    async fn poll(&mut self, shared: &SharedState) -> Result<()> {
        let fields = self.client.poll().await?;
        let writes = collect_writes("gps", &GPS_FIELDS, &self.ids, &fields, self.policy)?;
        publish(shared, writes).await
    }
}
