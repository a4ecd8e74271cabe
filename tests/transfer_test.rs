use confsync::compress::Compression;
use confsync::config::Config;
use confsync::transfer::{self, Downloader, Uploader};
use confsync::workers::CancelToken;
use confsync::ConfsyncError;
use rand::{thread_rng, Rng};
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

// ---------- mock blob store ----------

#[derive(Default)]
struct StoreState {
    blob: Vec<u8>,
    content_type: Option<String>,
    puts: usize,
}

/// A single-threaded HTTP/1.1 server that keeps the last PUT body and serves it on GET.
struct MockStore {
    port: u16,
    state: Arc<Mutex<StoreState>>,
}

impl MockStore {
    fn start(put_status: u16, get_status: u16) -> Self {
        Self::spawn(put_status, get_status, false)
    }

    /// A store that drains request bodies at roughly 60 KiB per millisecond, so a
    /// multi-megabyte upload stays in flight long enough to interfere with.
    fn start_slow() -> Self {
        Self::spawn(200, 200, true)
    }

    fn spawn(put_status: u16, get_status: u16, slow: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(StoreState::default()));
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                // A client that hangs up mid-request is part of some tests.
                let _ = handle(stream, &shared, put_status, get_status, slow);
            }
        });
        Self { port, state }
    }

    fn url(&self) -> String {
        format!(
            "http://127.0.0.1:{}/bucket/user-config?X-Amz-Date=22000101T000000Z&X-Amz-Expires=3600&X-Amz-Signature=deadbeef",
            self.port
        )
    }
}

fn handle(
    stream: TcpStream,
    state: &Mutex<StoreState>,
    put_status: u16,
    get_status: u16,
    slow: bool,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let method = request_line.split_whitespace().next().unwrap_or("").to_string();

    let mut content_length = None;
    let mut chunked = false;
    let mut content_type = None;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            match name.to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.parse::<usize>().ok(),
                "transfer-encoding" => chunked = value.eq_ignore_ascii_case("chunked"),
                "content-type" => content_type = Some(value.to_string()),
                _ => {}
            }
        }
    }

    let body = if chunked {
        read_chunked(&mut reader, slow)?
    } else {
        let mut body = vec![0u8; content_length.unwrap_or(0)];
        reader.read_exact(&mut body)?;
        body
    };

    let mut stream = stream;
    match method.as_str() {
        "PUT" => {
            if (200..300).contains(&put_status) {
                let mut s = state.lock().unwrap();
                s.blob = body;
                s.content_type = content_type;
                s.puts += 1;
            }
            write!(
                stream,
                "HTTP/1.1 {put_status} Mock\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            )?;
        }
        "GET" => {
            let blob = state.lock().unwrap().blob.clone();
            write!(
                stream,
                "HTTP/1.1 {get_status} Mock\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                blob.len()
            )?;
            stream.write_all(&blob)?;
        }
        _ => {
            write!(stream, "HTTP/1.1 405 Mock\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")?;
        }
    }
    stream.flush()
}

fn read_chunked<R: BufRead>(reader: &mut R, slow: bool) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        if reader.read_line(&mut size_line)? == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        let size_hex = size_line.trim().split(';').next().unwrap_or("");
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad chunk size"))?;
        if size == 0 {
            // Trailers, then the final empty line.
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
                    return Ok(body);
                }
            }
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..])?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if slow {
            thread::sleep(Duration::from_micros((size / 64) as u64));
        }
    }
}

// ---------- helpers ----------

fn config(compression: Compression) -> Config {
    let mut cfg = Config {
        compression,
        ..Config::default()
    };
    // Small pipe so the pack worker has to wait on the HTTP body.
    cfg.transfer.pipe_capacity = 1;
    cfg.transfer.chunk_size = 512;
    cfg.transfer.timeout_secs = Some(30);
    cfg
}

// ---------- tests ----------

#[test]
fn backup_then_restore_through_presigned_urls() {
    for compression in [Compression::None, Compression::Zstd] {
        let store = MockStore::start(200, 200);
        let home = tempdir().unwrap();
        let mut big = vec![0u8; 200 * 1024];
        thread_rng().fill(&mut big[..]);
        fs::write(home.path().join(".bash_history"), &big).unwrap();
        fs::write(home.path().join(".gitconfig"), b"[core]\n\teditor = vim\n").unwrap();

        let cfg = config(compression);
        let pattern = format!("{}/.*", home.path().display());
        let summary = transfer::backup(&store.url(), &[pattern], &cfg).unwrap();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.bytes, big.len() as u64 + 21);

        {
            let s = store.state.lock().unwrap();
            assert_eq!(s.puts, 1);
            let expected = match compression {
                Compression::Zstd => "application/zstd",
                _ => "application/x-tar",
            };
            assert_eq!(s.content_type.as_deref(), Some(expected));
        }

        fs::remove_file(home.path().join(".bash_history")).unwrap();
        fs::write(home.path().join(".gitconfig"), b"overwritten").unwrap();

        let report = transfer::restore(&store.url(), &cfg).unwrap();
        assert_eq!(report.restored, 2);
        assert_eq!(fs::read(home.path().join(".bash_history")).unwrap(), big);
        assert_eq!(
            fs::read(home.path().join(".gitconfig")).unwrap(),
            b"[core]\n\teditor = vim\n"
        );
    }
}

#[test]
fn rejected_put_is_an_http_error() {
    let store = MockStore::start(403, 200);
    let home = tempdir().unwrap();
    fs::write(home.path().join(".zshrc"), b"setopt autocd").unwrap();

    let pattern = format!("{}/.zshrc", home.path().display());
    let err = transfer::backup(&store.url(), &[pattern], &config(Compression::None)).unwrap_err();
    assert!(matches!(err, ConfsyncError::HttpStatus { status: 403 }), "got {err:?}");
    assert_eq!(store.state.lock().unwrap().puts, 0);
}

#[test]
fn get_must_answer_exactly_200() {
    for status in [201, 404] {
        let store = MockStore::start(200, status);
        let err = match Downloader::new(&config(Compression::None)).download(&store.url()) {
            Ok(_) => panic!("status {status} was accepted"),
            Err(e) => e,
        };
        assert!(
            matches!(err, ConfsyncError::HttpStatus { status: s } if s == status),
            "got {err:?}"
        );
    }
}

#[test]
fn pack_failure_fails_the_backup() {
    let store = MockStore::start(200, 200);
    let err = transfer::backup(&store.url(), &["[unclosed"], &config(Compression::None)).unwrap_err();
    assert!(matches!(err, ConfsyncError::Glob { .. }), "got {err:?}");
    assert_eq!(store.state.lock().unwrap().puts, 0);
}

#[test]
fn errors_never_leak_the_signature() {
    // Nothing listens on port 9 of localhost in a test sandbox.
    let url = "http://127.0.0.1:9/b?X-Amz-Date=22000101T000000Z&X-Amz-Expires=60&X-Amz-Signature=topsecret";
    let err = transfer::restore(url, &config(Compression::None)).unwrap_err();
    assert!(matches!(err, ConfsyncError::Transport(_)), "got {err:?}");
    assert!(!err.to_string().contains("topsecret"));
}

#[test]
fn caller_cancellation_stops_a_streaming_upload() {
    let store = MockStore::start_slow();
    let home = tempdir().unwrap();
    let mut big = vec![0u8; 32 * 1024 * 1024];
    thread_rng().fill(&mut big[..]);
    fs::write(home.path().join("history.db"), &big).unwrap();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });

    let pattern = format!("{}/history.db", home.path().display());
    let uploader = Uploader::new(&config(Compression::None));
    let err = uploader
        .upload_with_cancel(&store.url(), &[pattern], &cancel)
        .unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, ConfsyncError::Cancelled), "got {err:?}");
    assert_eq!(store.state.lock().unwrap().puts, 0);
}

#[cfg(unix)]
#[test]
fn pack_failure_after_streaming_started_is_never_stored() {
    let store = MockStore::start_slow();
    let home = tempdir().unwrap();
    let mut big = vec![0u8; 32 * 1024 * 1024];
    thread_rng().fill(&mut big[..]);
    fs::write(home.path().join("a_history.db"), &big).unwrap();
    let second = home.path().join("b_settings.conf");
    fs::write(&second, b"x = 1\n").unwrap();

    // Both files are resolved up front; the second turns into a directory while
    // the first is still streaming, so reading it fails mid-archive.
    let swap_target = second.clone();
    let swapper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        fs::remove_file(&swap_target).unwrap();
        fs::create_dir(&swap_target).unwrap();
    });

    let pattern = format!("{}/*", home.path().display());
    let err = transfer::backup(&store.url(), &[pattern], &config(Compression::None)).unwrap_err();
    swapper.join().unwrap();

    assert!(
        matches!(err, ConfsyncError::Io { ref path, .. } if path == &second),
        "got {err:?}"
    );
    assert_eq!(store.state.lock().unwrap().puts, 0);
}
