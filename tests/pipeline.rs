use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use plotstream::camera::{Camera, SizePolicy};
use plotstream::chart::SeriesRetention;
use plotstream::frame::{is_complete_jpeg, FrameSize};
use plotstream::publisher;
use plotstream::stream::{MjpegStream, ServerConfig, StreamServer};
use plotstream::synthetic::{SyntheticDevice, WaitOutcome};
use plotstream::transform::Compositor;

fn read_headers<R: BufRead>(reader: &mut R) -> Vec<String> {
    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let line = line.trim_end().to_owned();
        if line.is_empty() {
            return headers;
        }
        headers.push(line);
    }
}

fn content_length(headers: &[String]) -> usize {
    headers
        .iter()
        .find_map(|h| h.strip_prefix("Content-Length: "))
        .unwrap()
        .parse()
        .unwrap()
}

fn next_part<R: BufRead>(reader: &mut R) -> Vec<u8> {
    let headers = read_headers(reader);
    assert_eq!(headers[0], "--MJPEGBOUNDARY");
    assert!(headers.contains(&"Content-Type: image/jpeg".to_owned()));
    let mut jpeg = vec![0; content_length(&headers)];
    reader.read_exact(&mut jpeg).unwrap();
    let mut crlf = [0; 2];
    reader.read_exact(&mut crlf).unwrap();
    assert_eq!(&crlf, b"\r\n");
    jpeg
}

fn get(server: &StreamServer, path: &str) -> BufReader<TcpStream> {
    let mut conn = TcpStream::connect(server.local_addr()).unwrap();
    conn.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    write!(conn, "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path).unwrap();
    BufReader::new(conn)
}

#[test]
fn synthetic_camera_streams_composited_frames() {
    let device = SyntheticDevice::new()
        .with_frame_period(Duration::from_millis(10))
        .with_script([WaitOutcome::Timeout, WaitOutcome::Garbage]);
    let stream = MjpegStream::new();
    let mut capture = publisher::launch(
        move || Camera::open(device, SizePolicy::default()),
        Compositor::with_seed(SeriesRetention::Reset, 75, 42),
        stream.clone(),
        Duration::from_millis(200),
    )
    .unwrap();
    let server = StreamServer::launch("127.0.0.1:0", stream.clone(), ServerConfig::default()).unwrap();

    let mut reader = get(&server, "/camera");
    let headers = read_headers(&mut reader);
    assert_eq!(headers[0], "HTTP/1.1 200 OK");
    assert!(headers.contains(&"Content-Type: multipart/x-mixed-replace;boundary=MJPEGBOUNDARY".to_owned()));

    let first = next_part(&mut reader);
    assert!(is_complete_jpeg(&first));
    let img = image::load_from_memory(&first).unwrap().to_rgb8();
    // third size the synthetic device reports
    assert_eq!(img.dimensions(), (640, 480));
    // synthetic frames have a constant blue channel, chart strokes and text don't
    let stroked = |xs: std::ops::Range<u32>, ys: std::ops::Range<u32>| {
        ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
            .filter(|&(x, y)| img.get_pixel(x, y)[2].abs_diff(128) > 48)
            .count()
    };
    assert!(stroked(0..480, 0..288) > 100);
    assert_eq!(stroked(500..600, 0..480), 0);
    assert_eq!(stroked(0..600, 300..480), 0);

    let second = next_part(&mut reader);
    assert!(is_complete_jpeg(&second));
    assert_ne!(first, second);

    let status = stream.status();
    assert!(status.streaming);
    assert_eq!(status.clients, 1);
    assert_eq!(status.format.as_deref(), Some("MJPG"));
    drop(reader);

    assert!(capture.join().is_none());
    server.stop().unwrap();
    assert!(!stream.status().streaming);
}

#[test]
fn late_client_gets_current_frame_immediately() {
    let stream = MjpegStream::new();
    let mut capture = publisher::launch(
        move || Camera::open(SyntheticDevice::new(), SizePolicy::Smallest),
        Compositor::with_seed(SeriesRetention::Accumulate, 75, 7),
        stream.clone(),
        Duration::from_secs(1),
    )
    .unwrap();
    stream.wait_newer(0, Duration::from_secs(10)).unwrap();
    // stop producing so that only the already published frame is available
    assert!(capture.join().is_none());

    let server = StreamServer::launch("127.0.0.1:0", stream.clone(), ServerConfig::default()).unwrap();
    let mut reader = get(&server, "/camera");
    read_headers(&mut reader);
    let jpeg = next_part(&mut reader);
    let (_, latest) = stream.latest().unwrap();
    assert_eq!(&jpeg[..], &latest[..]);
    let img = image::load_from_memory(&jpeg).unwrap();
    assert_eq!((img.width(), img.height()), (160, 120));
    drop(reader);
    server.stop().unwrap();
}

#[test]
fn status_endpoint_reports_negotiated_format() {
    let stream = MjpegStream::new();
    let mut capture = publisher::launch(
        move || Camera::open(SyntheticDevice::new(), SizePolicy::Closest(FrameSize::new(1280, 700))),
        Compositor::with_seed(SeriesRetention::Reset, 75, 3),
        stream.clone(),
        Duration::from_secs(1),
    )
    .unwrap();
    stream.wait_newer(0, Duration::from_secs(10)).unwrap();
    let server = StreamServer::launch("127.0.0.1:0", stream.clone(), ServerConfig::default()).unwrap();

    let mut reader = get(&server, "/debug/status");
    let headers = read_headers(&mut reader);
    assert_eq!(headers[0], "HTTP/1.1 200 OK");
    assert!(headers.contains(&"Content-Type: application/json".to_owned()));
    let mut body = vec![0; content_length(&headers)];
    reader.read_exact(&mut body).unwrap();
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["format"], "MJPG");
    assert_eq!(status["width"], 1280);
    assert_eq!(status["height"], 720);
    assert_eq!(status["streaming"], true);
    assert!(status["frame_id"].as_u64().unwrap() >= 1);

    let mut reader = get(&server, "/elsewhere");
    assert_eq!(read_headers(&mut reader)[0], "HTTP/1.1 404 Not Found");

    assert!(capture.join().is_none());
    server.stop().unwrap();
}

#[test]
fn too_few_frame_sizes_is_a_capture_error() {
    let device = SyntheticDevice::new().with_frame_sizes(vec![FrameSize::new(320, 240), FrameSize::new(640, 480)]);
    let mut capture = publisher::launch(
        move || Camera::open(device, SizePolicy::default()),
        Compositor::default(),
        MjpegStream::new(),
        Duration::from_secs(1),
    )
    .unwrap();
    while !capture.is_finished() {
        std::thread::sleep(Duration::from_millis(1));
    }
    let err = capture.join().unwrap();
    assert!(!err.is_transient());
    assert!(matches!(err, plotstream::Error::FrameSizeIndex { index: 2, available: 2 }));
}
