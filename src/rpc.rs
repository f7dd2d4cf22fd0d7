use anyhow::Result;
use log::{debug, warn};
use reqwest::{blocking::Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use serde_with::{serde_as, DefaultOnNull};
use thiserror::Error;

use crate::{
    config::RpcConfig,
    model::{FileEntry, PeerStat, SnapshotSet, TorrentAction, TorrentSnapshot, TorrentState},
};

const CONTENT_TYPE: &str = "text/json; charset=UTF-8";
const NO_SUCH_TORRENT: &str = "no such torrent";

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("{0}")]
    Protocol(String),
    #[error("torrent {0} not found")]
    NotFound(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Malformed(err.to_string())
    }
}

pub type RpcResult<T> = std::result::Result<T, RpcError>;

/// Carries one JSON request body to the daemon and hands back the decoded
/// response body, without interpreting it.
pub trait Transport {
    fn post(&self, body: &Value) -> RpcResult<Value>;
}

pub struct HttpTransport {
    http: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint(),
        })
    }
}

impl Transport for HttpTransport {
    fn post(&self, body: &Value) -> RpcResult<Value> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", CONTENT_TYPE)
            .body(serde_json::to_vec(body)?)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::HttpStatus(status));
        }
        let bytes = response.bytes()?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub struct XdClient<T = HttpTransport> {
    transport: T,
    swarm: String,
}

impl XdClient<HttpTransport> {
    pub fn connect(config: &RpcConfig) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(transport, config.swarm.clone()))
    }
}

impl<T: Transport> XdClient<T> {
    pub fn new(transport: T, swarm: impl Into<String>) -> Self {
        Self {
            transport,
            swarm: swarm.into(),
        }
    }

    pub fn list_infohashes(&self) -> RpcResult<Vec<String>> {
        let value = self.call("XD.ListTorrents", Map::new())?;
        let list: TorrentListWire = serde_json::from_value(value)?;
        Ok(list.infohashes)
    }

    pub fn torrent_status(&self, infohash: &str) -> RpcResult<TorrentSnapshot> {
        let mut params = Map::new();
        params.insert("infohash".to_string(), json!(infohash));
        let value = self.call("XD.TorrentStatus", params).map_err(|err| match err {
            RpcError::Protocol(msg) if msg == NO_SUCH_TORRENT => {
                RpcError::NotFound(infohash.to_string())
            }
            other => other,
        })?;
        if value.is_null() {
            return Err(RpcError::NotFound(infohash.to_string()));
        }
        let wire: TorrentStatusWire = serde_json::from_value(value)?;
        Ok(TorrentSnapshot::from(wire))
    }

    pub fn fetch_all_torrents(&self) -> RpcResult<SnapshotSet> {
        let infohashes = self.list_infohashes()?;
        let mut set = SnapshotSet::default();
        for infohash in infohashes {
            match self.torrent_status(&infohash) {
                Ok(snapshot) => set.torrents.push(snapshot),
                Err(RpcError::NotFound(_)) => {
                    debug!("torrent {infohash} vanished before its status was fetched");
                }
                Err(err) => {
                    warn!("status for {infohash} unavailable: {err}");
                    set.unresolved.push(infohash);
                }
            }
        }
        Ok(set)
    }

    pub fn add_torrent_by_url(&self, url: &str) -> RpcResult<()> {
        let url = url.trim();
        if url.is_empty() {
            return Err(RpcError::Protocol("no torrent url given".to_string()));
        }
        let mut params = Map::new();
        params.insert("url".to_string(), json!(url));
        self.call("XD.AddTorrent", params)?;
        Ok(())
    }

    pub fn change_torrent(&self, infohash: &str, action: TorrentAction) -> RpcResult<()> {
        let mut params = Map::new();
        params.insert("action".to_string(), json!(action.rpc_value()));
        params.insert("infohash".to_string(), json!(infohash));
        self.call("XD.ChangeTorrent", params)?;
        Ok(())
    }

    fn call(&self, method: &str, mut params: Map<String, Value>) -> RpcResult<Value> {
        params.insert("method".to_string(), json!(method));
        params.insert("swarm".to_string(), json!(self.swarm));
        let body = Value::Object(params);
        debug!("rpc call {method}");
        let response = self.transport.post(&body)?;
        unwrap_response(response)
    }
}

// The daemon answers either `{"error": "..."}`, `{"error": null, "result": ...}`
// or the bare result object.
fn unwrap_response(response: Value) -> RpcResult<Value> {
    let Value::Object(mut object) = response else {
        return Ok(response);
    };
    match object.remove("error") {
        None | Some(Value::Null) => {}
        Some(Value::String(msg)) => return Err(RpcError::Protocol(msg)),
        Some(other) => return Err(RpcError::Protocol(other.to_string())),
    }
    match object.remove("result") {
        Some(result) => Ok(result),
        None => Ok(Value::Object(object)),
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct TorrentListWire {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default, rename = "Infohashes", alias = "infohashes")]
    infohashes: Vec<String>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct TorrentStatusWire {
    #[serde(rename = "Infohash", alias = "infohash")]
    infohash: String,
    #[serde(default, rename = "Name", alias = "name")]
    name: String,
    #[serde(default, rename = "State", alias = "state")]
    state: String,
    #[serde(default, rename = "Progress", alias = "progress")]
    progress: f64,
    #[serde(default, rename = "Bitfield", alias = "bitfield")]
    bitfield: Option<Vec<PieceFlag>>,
    #[serde(default, rename = "Us")]
    us: Option<LocalPeerWire>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default, rename = "Peers", alias = "peers")]
    peers: Vec<Option<PeerWire>>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default, rename = "Files", alias = "files")]
    files: Vec<FileWire>,
    #[serde(default, rename = "TX", alias = "tx")]
    tx: f64,
    #[serde(default, rename = "RX", alias = "rx")]
    rx: f64,
}

// XD marshals bitfields as 0/1 integers; older payloads used booleans.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PieceFlag {
    Bool(bool),
    Int(u64),
}

impl From<PieceFlag> for bool {
    fn from(flag: PieceFlag) -> Self {
        match flag {
            PieceFlag::Bool(set) => set,
            PieceFlag::Int(value) => value != 0,
        }
    }
}

fn piece_flags(flags: Vec<PieceFlag>) -> Vec<bool> {
    flags.into_iter().map(bool::from).collect()
}

#[derive(Debug, Deserialize)]
struct LocalPeerWire {
    #[serde(default, rename = "Bitfield")]
    bitfield: Option<Vec<PieceFlag>>,
}

#[derive(Debug, Deserialize)]
struct PeerWire {
    #[serde(default, rename = "ID", alias = "id")]
    id: String,
    #[serde(default, rename = "Addr", alias = "addr")]
    addr: String,
    #[serde(default, rename = "TX", alias = "tx")]
    tx: f64,
    #[serde(default, rename = "RX", alias = "rx")]
    rx: f64,
}

#[derive(Debug, Deserialize)]
struct FileWire {
    #[serde(default, rename = "Length", alias = "length")]
    length: Option<f64>,
    #[serde(default, rename = "FileInfo")]
    file_info: Option<FileInfoWire>,
}

#[derive(Debug, Deserialize)]
struct FileInfoWire {
    #[serde(default, rename = "Length", alias = "length")]
    length: f64,
}

impl From<TorrentStatusWire> for TorrentSnapshot {
    fn from(wire: TorrentStatusWire) -> Self {
        TorrentSnapshot {
            infohash: wire.infohash,
            name: wire.name,
            state: TorrentState::from(wire.state),
            progress: wire.progress,
            bitfield: wire
                .bitfield
                .or_else(|| wire.us.and_then(|us| us.bitfield))
                .map(piece_flags),
            peers: wire.peers.into_iter().flatten().map(PeerStat::from).collect(),
            files: wire
                .files
                .into_iter()
                .map(|file| FileEntry {
                    length: counter(
                        file.length
                            .or(file.file_info.map(|info| info.length))
                            .unwrap_or(0.0),
                    ),
                })
                .collect(),
            total_tx: counter(wire.tx),
            total_rx: counter(wire.rx),
        }
    }
}

impl From<PeerWire> for PeerStat {
    fn from(wire: PeerWire) -> Self {
        let id = if wire.id.is_empty() { wire.addr } else { wire.id };
        PeerStat {
            id,
            tx: counter(wire.tx),
            rx: counter(wire.rx),
        }
    }
}

// Counters arrive as JSON numbers, sometimes fractional.
fn counter(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value as u64
    } else {
        0
    }
}
