use predicates::prelude::*;
use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::thread;

const ROOT_PAGE: &str = r#"<html><body>
<a href="/yearbook/2023">Yearbook 2023</a>
<a href="/about">About the program</a>
</body></html>"#;

const PERIOD_PAGE: &str = r#"<html><body>
<a href="/files/tables.xlsx">Nonimmigrant Admissions Tables</a>
<a href="/files/enforcement.pdf">Enforcement Actions</a>
</body></html>"#;

const FILE_BODY: &[u8] = b"spreadsheet-bytes";

/// Minimal one-request-per-connection HTTP server on a loopback port.
fn spawn_site() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let mut parts = request.split_whitespace();
            let method = parts.next().unwrap_or("").to_string();
            let path = parts.next().unwrap_or("").to_string();

            let (status, extra, body): (&str, &str, &[u8]) = match path.as_str() {
                "/" => ("200 OK", "", ROOT_PAGE.as_bytes()),
                "/yearbook/2023" => ("200 OK", "", PERIOD_PAGE.as_bytes()),
                "/files/tables.xlsx" => ("200 OK", "ETag: \"v1\"\r\n", FILE_BODY),
                "/about" => (
                    "200 OK",
                    "",
                    b"<html><body><p>About the program</p></body></html>",
                ),
                _ => ("404 Not Found", "", b""),
            };
            let head = format!(
                "HTTP/1.1 {status}\r\nConnection: close\r\nContent-Length: {}\r\n{extra}\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            if method != "HEAD" {
                let _ = stream.write_all(body);
            }
            let _ = stream.flush();
        }
    });
    addr
}

/// Like `spawn_site`, but the file body is mutable between runs, no ETag is
/// sent, and every request line is recorded.
fn spawn_changing_site(
    body: Arc<Mutex<Vec<u8>>>,
    requests: Arc<Mutex<Vec<String>>>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let mut parts = request.split_whitespace();
            let method = parts.next().unwrap_or("").to_string();
            let path = parts.next().unwrap_or("").to_string();
            requests
                .lock()
                .expect("request log")
                .push(format!("{method} {path}"));

            let (status, resp_body): (&str, Vec<u8>) = match path.as_str() {
                "/" => ("200 OK", ROOT_PAGE.into()),
                "/yearbook/2023" => ("200 OK", PERIOD_PAGE.into()),
                "/files/tables.xlsx" => ("200 OK", body.lock().expect("body").clone()),
                _ => ("404 Not Found", Vec::new()),
            };
            let head = format!(
                "HTTP/1.1 {status}\r\nConnection: close\r\nContent-Length: {}\r\n\r\n",
                resp_body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            if method != "HEAD" {
                let _ = stream.write_all(&resp_body);
            }
            let _ = stream.flush();
        }
    });
    addr
}

fn crawl_cmd(home: &std::path::Path, root: &str) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("yb-harvest");
    cmd.current_dir(home)
        .env("YB_HOME", home)
        .env("YB_ROOT_URL", root)
        .env("YB_POLITE_DELAY_MS", "0")
        .env("YB_HTTP_MAX_ATTEMPTS", "2")
        .env("YB_HTTP_BACKOFF_INITIAL_MS", "10")
        .arg("crawl");
    cmd
}

#[test]
fn crawl_downloads_once_then_skips_by_validators() {
    let addr = spawn_site();
    let root = format!("http://{addr}/");
    let tmp = tempfile::tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    fs::create_dir_all(&home).expect("mkdir home");

    // First run: one file discovered and downloaded, the excluded title and
    // non-data extension never fetched.
    crawl_cmd(&home, &root)
        .assert()
        .success()
        .stdout(predicate::str::contains("downloaded=1"))
        .stdout(predicate::str::contains("errors=0"));

    let saved = home.join("data/yearbook/2023/tables.xlsx");
    assert_eq!(fs::read(&saved).expect("saved file"), FILE_BODY);

    let ledger = home.join("state/yearbook_ledger.csv");
    let table = fs::read_to_string(&ledger).expect("ledger");
    assert!(table.contains("tables.xlsx"));
    assert!(table.contains("v1"));
    assert!(!table.contains("enforcement"));
    assert_eq!(table.lines().count(), 2);

    // Second run: the HEAD probe matches the stored ETag, nothing is
    // fetched or rewritten.
    crawl_cmd(&home, &root)
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped=1"))
        .stdout(predicate::str::contains("downloaded=0"));

    let table = fs::read_to_string(&ledger).expect("ledger");
    assert_eq!(table.lines().count(), 2);
}

#[test]
fn changed_content_versions_in_safe_mode_and_overwrites_in_place() {
    let body = Arc::new(Mutex::new(b"gen-1".to_vec()));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn_changing_site(body.clone(), requests.clone());
    let root = format!("http://{addr}/");
    let tmp = tempfile::tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    fs::create_dir_all(&home).expect("mkdir home");

    let v1_file = home.join("data/yearbook/2023/tables.xlsx");
    let v2_file = home.join("data/yearbook/2023/tables.v2.xlsx");
    let ledger = home.join("state/yearbook_ledger.csv");

    // Run 1: fresh download. A URL the ledger has never seen gets no
    // validator probe at all.
    crawl_cmd(&home, &root)
        .assert()
        .success()
        .stdout(predicate::str::contains("downloaded=1"));
    assert_eq!(fs::read(&v1_file).expect("v1 file"), b"gen-1");
    assert!(
        !requests
            .lock()
            .expect("request log")
            .iter()
            .any(|r| r.starts_with("HEAD")),
        "fresh crawl should not issue HEAD probes"
    );

    // Run 2: content changed, safe mode writes version 2 alongside and
    // leaves the version 1 file alone.
    *body.lock().expect("body") = b"gen-2".to_vec();
    crawl_cmd(&home, &root)
        .assert()
        .success()
        .stdout(predicate::str::contains("versioned=1"));
    assert_eq!(fs::read(&v1_file).expect("v1 file"), b"gen-1");
    assert_eq!(fs::read(&v2_file).expect("v2 file"), b"gen-2");
    assert_eq!(
        fs::read_to_string(&ledger).expect("ledger").lines().count(),
        3
    );

    // Run 3: identical content downloads but writes no file and no row.
    crawl_cmd(&home, &root)
        .assert()
        .success()
        .stdout(predicate::str::contains("unchanged=1"));
    assert_eq!(fs::read(&v2_file).expect("v2 file"), b"gen-2");
    assert_eq!(
        fs::read_to_string(&ledger).expect("ledger").lines().count(),
        3
    );

    // Run 4: overwrite mode replaces the bytes at the current record's
    // path; history file and row count are untouched.
    *body.lock().expect("body") = b"gen-3".to_vec();
    crawl_cmd(&home, &root)
        .args(["--mode", "overwrite"])
        .assert()
        .success()
        .stdout(predicate::str::contains("downloaded=1"));
    assert_eq!(fs::read(&v2_file).expect("v2 file"), b"gen-3");
    assert_eq!(fs::read(&v1_file).expect("v1 file"), b"gen-1");
    let table = fs::read_to_string(&ledger).expect("ledger");
    assert_eq!(table.lines().count(), 3);
    assert!(table.contains("tables.v2.xlsx"));
}

#[test]
fn oversized_file_is_a_counted_error_not_a_crash() {
    let addr = spawn_site();
    let root = format!("http://{addr}/");
    let tmp = tempfile::tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    fs::create_dir_all(&home).expect("mkdir home");

    crawl_cmd(&home, &root)
        .env("YB_MAX_FILE_BYTES", "8")
        .assert()
        .success()
        .stdout(predicate::str::contains("errors=1"))
        .stdout(predicate::str::contains("downloaded=0"));

    assert!(!home.join("data/yearbook/2023/tables.xlsx").exists());
}

#[test]
fn crawl_fails_when_discovery_finds_nothing() {
    let addr = spawn_site();
    // The about page has no period links at all.
    let root = format!("http://{addr}/about");
    let tmp = tempfile::tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    fs::create_dir_all(&home).expect("mkdir home");

    crawl_cmd(&home, &root).assert().failure();
}
