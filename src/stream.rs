//! The published frame and the HTTP side that serves it.
//!
//! The publisher swaps finished JPEGs into a single shared slot. Requests are parsed and routed
//! by tiny_http. Every `/camera` client gets its own thread that waits on the slot and writes
//! whatever is newest as the next part of a `multipart/x-mixed-replace` response.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tiny_http::{Header, Method, Request, Response, Server};

use crate::error::{Error, Result};
use crate::frame::{is_complete_jpeg, FrameSize, PixelFormat};
use crate::worker::Worker;

pub const BOUNDARY: &str = "MJPEGBOUNDARY";
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

// how long client threads block before looking at the kill flag again
const POLL: Duration = Duration::from_millis(100);
// longer request targets are refused with 414
const MAX_URL: usize = 2048;

#[derive(Default)]
struct Latest {
    id: u64,
    jpeg: Option<Arc<[u8]>>,
    source: Option<(PixelFormat, FrameSize)>,
    streaming: bool,
}

#[derive(Default)]
struct Shared {
    latest: Mutex<Latest>,
    fresh: Condvar,
    clients: AtomicUsize,
}

/// Latest-frame slot shared between the publisher and any number of readers. Clones share the
/// same slot.
#[derive(Clone, Default)]
pub struct MjpegStream {
    shared: Arc<Shared>,
}

/// What `/debug/status` reports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub format: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub streaming: bool,
    pub frame_id: u64,
    pub clients: usize,
}

impl MjpegStream {
    pub fn new() -> MjpegStream {
        MjpegStream::default()
    }

    fn lock(&self) -> MutexGuard<'_, Latest> {
        // a panicking publisher leaves nothing half-written behind: the slot is only ever
        // replaced whole
        self.shared.latest.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the current frame and wakes every waiting reader. Returns the new frame id.
    pub fn publish(&self, jpeg: Vec<u8>) -> Result<u64> {
        if !is_complete_jpeg(&jpeg) {
            return Err(Error::FrameData);
        }
        let jpeg: Arc<[u8]> = jpeg.into();
        let id = {
            let mut latest = self.lock();
            latest.id += 1;
            latest.jpeg = Some(jpeg);
            latest.id
        };
        self.shared.fresh.notify_all();
        Ok(id)
    }

    pub fn latest(&self) -> Option<(u64, Arc<[u8]>)> {
        let latest = self.lock();
        latest.jpeg.clone().map(|jpeg| (latest.id, jpeg))
    }

    /// Blocks until a frame newer than `seen` is published, or `timeout` passes.
    pub fn wait_newer(&self, seen: u64, timeout: Duration) -> Option<(u64, Arc<[u8]>)> {
        let latest = self.lock();
        let (latest, _) = self
            .shared
            .fresh
            .wait_timeout_while(latest, timeout, |l| l.id <= seen || l.jpeg.is_none())
            .unwrap_or_else(|e| e.into_inner());
        if latest.id > seen {
            latest.jpeg.clone().map(|jpeg| (latest.id, jpeg))
        } else {
            None
        }
    }

    pub fn frame_id(&self) -> u64 {
        self.lock().id
    }

    pub fn set_source(&self, format: PixelFormat, size: FrameSize) {
        self.lock().source = Some((format, size));
    }

    pub fn set_streaming(&self, streaming: bool) {
        self.lock().streaming = streaming;
    }

    pub fn client_count(&self) -> usize {
        self.shared.clients.load(Ordering::Acquire)
    }

    pub fn status(&self) -> StreamStatus {
        let latest = self.lock();
        StreamStatus {
            format: latest.source.map(|(f, _)| f.to_string()),
            width: latest.source.map(|(_, s)| s.width),
            height: latest.source.map(|(_, s)| s.height),
            streaming: latest.streaming,
            frame_id: latest.id,
            clients: self.client_count(),
        }
    }

    fn register_client(&self) -> ClientGuard {
        self.shared.clients.fetch_add(1, Ordering::AcqRel);
        ClientGuard { stream: self.clone() }
    }
}

struct ClientGuard {
    stream: MjpegStream,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.stream.shared.clients.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ServerConfig {
    /// Minimum time between two frames sent to the same client.
    pub interval: Duration,
    /// Serve `/debug/status`.
    pub diagnostics: bool,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            interval: DEFAULT_INTERVAL,
            diagnostics: true,
        }
    }
}

pub struct StreamServer {
    worker: Worker,
    local_addr: SocketAddr,
}

impl StreamServer {
    /// Binds `addr` and starts answering requests in the background.
    pub fn launch(addr: &str, stream: MjpegStream, config: ServerConfig) -> Result<StreamServer> {
        let server = Server::http(addr).map_err(|source| Error::Bind {
            addr: addr.to_owned(),
            source,
        })?;
        let local_addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "not an ip listener"))?;
        log::info!("serving /camera on http://{}", local_addr);

        let worker = Worker::spawn("http-accept", move |kill_flag| {
            let mut clients: Vec<JoinHandle<()>> = Vec::new();

            while !kill_flag.load(Ordering::Acquire) {
                // prune finished clients
                clients.retain(|c| !c.is_finished());

                let Some(request) = server.recv_timeout(POLL)? else {
                    continue;
                };
                match route(&request, config) {
                    Route::Camera => {
                        let peer = request.remote_addr().copied();
                        let stream = stream.clone();
                        let kill_flag = kill_flag.clone();
                        let interval = config.interval;
                        let handle = thread::Builder::new().name("http-camera".to_owned()).spawn(move || {
                            let mut out = request.into_writer();
                            if let Err(e) = send_mjpeg(&mut out, &stream, interval, &kill_flag) {
                                log::debug!("client {:?}: {}", peer, e);
                            }
                            log::debug!("client {:?} gone", peer);
                        })?;
                        clients.push(handle);
                    }
                    Route::Status => {
                        let body = serde_json::to_vec(&stream.status())?;
                        let response = Response::from_data(body).with_header(header("Content-Type", "application/json")?);
                        reply(request, response);
                    }
                    Route::NotFound => reply(request, Response::from_string("not found\n").with_status_code(404)),
                    Route::BadMethod => {
                        let response = Response::from_string("method not allowed\n")
                            .with_status_code(405)
                            .with_header(header("Allow", "GET")?);
                        reply(request, response);
                    }
                    Route::TooLong => reply(request, Response::from_string("uri too long\n").with_status_code(414)),
                }
            }

            for client in clients {
                let _ = client.join();
            }
            Ok(())
        })?;

        Ok(StreamServer { worker, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn stop(mut self) -> Result<()> {
        match self.worker.join() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Camera,
    Status,
    NotFound,
    BadMethod,
    TooLong,
}

fn route(request: &Request, config: ServerConfig) -> Route {
    let url = request.url();
    log::debug!("{} {:.64}", request.method(), url);
    if url.len() > MAX_URL {
        return Route::TooLong;
    }
    if *request.method() != Method::Get {
        return Route::BadMethod;
    }
    match url.split(['?', '#']).next().unwrap_or_default() {
        "/camera" => Route::Camera,
        "/debug/status" if config.diagnostics => Route::Status,
        _ => Route::NotFound,
    }
}

fn header(field: &str, value: &str) -> Result<Header> {
    Header::from_bytes(field.as_bytes(), value.as_bytes())
        .map_err(|()| io::Error::new(io::ErrorKind::InvalidInput, format!("bad header {}", field)).into())
}

fn reply<R: io::Read>(request: Request, response: Response<R>) {
    // the client hanging up early is its own business
    if let Err(e) = request.respond(response) {
        log::debug!("response not delivered: {}", e);
    }
}

fn write_part<W: Write>(out: &mut W, jpeg: &[u8]) -> io::Result<()> {
    write!(
        out,
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    )?;
    out.write_all(jpeg)?;
    out.write_all(b"\r\n")?;
    out.flush()
}

// tiny_http would send an open-ended body chunked, and its encoder holds back the tail of each
// frame until the next one arrives, so the multipart response goes out on the raw connection.
fn send_mjpeg<W: Write>(out: &mut W, stream: &MjpegStream, interval: Duration, kill_flag: &AtomicBool) -> Result<()> {
    let _guard = stream.register_client();
    write!(
        out,
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace;boundary={}\r\n\
         Cache-Control: no-cache\r\nConnection: close\r\n\r\n",
        BOUNDARY
    )?;
    out.flush()?;

    let mut seen = 0;
    let mut last_sent: Option<Instant> = None;
    if let Some((id, jpeg)) = stream.latest() {
        write_part(out, &jpeg)?;
        seen = id;
        last_sent = Some(Instant::now());
    }

    while !kill_flag.load(Ordering::Acquire) {
        if let Some(sent) = last_sent {
            let elapsed = sent.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        let Some((id, jpeg)) = stream.wait_newer(seen, POLL) else {
            continue;
        };
        // a write error just means the client went away
        if let Err(e) = write_part(out, &jpeg) {
            log::debug!("stopped streaming: {}", e);
            break;
        }
        seen = id;
        last_sent = Some(Instant::now());
    }
    Ok(())
}
