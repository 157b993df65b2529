// SPDX-License-Identifier: Apache-2.0

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

fn guvnor(tmp: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_guvnor"));
    cmd.env("GUVNOR_HOME", tmp.join(".guvnor"));
    cmd.current_dir(tmp);
    cmd
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn http_request(addr: &str, method: &str, host: &str, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).unwrap();
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {host}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    let status = response
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    (status, body)
}

fn wait_for_listener(addr: &str) -> bool {
    for _ in 0..150 {
        if TcpStream::connect(addr).is_ok() {
            return true;
        }
        thread::sleep(Duration::from_millis(100));
    }
    false
}

#[test]
fn version_flag_prints_version() {
    let tmp = tempfile::tempdir().unwrap();
    let output = guvnor(tmp.path()).arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("guvnor"));
}

#[test]
fn validate_accepts_good_config() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("guvnor.toml"),
        r#"
[[apps]]
name = "web"
command = "sleep"
args = ["60"]
"#,
    )
    .unwrap();

    let output = guvnor(tmp.path())
        .args(["validate", "--config", "guvnor.toml"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("is valid"));
    assert!(stdout.contains("web.localhost"));
}

#[test]
fn validate_rejects_duplicate_ports() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("guvnor.toml"),
        r#"
[[apps]]
name = "web"
command = "sleep"
port = 4000

[[apps]]
name = "api"
command = "sleep"
port = 4000
"#,
    )
    .unwrap();

    let output = guvnor(tmp.path())
        .args(["validate", "--config", "guvnor.toml"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("duplicate port"));
}

#[test]
fn validate_reports_missing_file() {
    let tmp = tempfile::tempdir().unwrap();
    let output = guvnor(tmp.path())
        .args(["validate", "--config", "missing.toml"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

#[test]
fn status_without_supervisor_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let output = guvnor(tmp.path()).arg("status").output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No running supervisor"));
}

#[test]
fn cert_info_reports_empty_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let output = guvnor(tmp.path()).args(["cert", "info"]).output().unwrap();
    assert!(output.status.success(), "{output:?}");
    assert!(String::from_utf8_lossy(&output.stdout).contains("No cached certificates"));
}

#[cfg(unix)]
#[test]
fn start_serves_proxy_and_management_api() {
    let tmp = tempfile::tempdir().unwrap();
    let http_port = free_port();
    let backend_port = free_port();

    std::fs::write(
        tmp.path().join("guvnor.toml"),
        format!(
            r#"
[server]
http_port = {http_port}
shutdown_timeout_secs = 2

[[apps]]
name = "web"
hostname = "web.localhost"
port = {backend_port}
command = "sh"
args = ["-c", "sleep 120"]
"#
        ),
    )
    .unwrap();

    let mut server = guvnor(tmp.path())
        .args(["start", "--config", "guvnor.toml", "--foreground"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mgmt_addr = format!("127.0.0.1:{}", http_port + 1000);
    assert!(wait_for_listener(&mgmt_addr), "management api never came up");

    let (status, body) = http_request(&mgmt_addr, "GET", "localhost", "/api/ping");
    assert_eq!(status, 200);
    assert!(body.contains("\"ok\""));

    let (status, body) = http_request(&mgmt_addr, "GET", "localhost", "/api/status");
    assert_eq!(status, 200);
    assert!(body.contains("\"web\""));
    assert!(body.contains("\"running\""));

    // PID file exists while the child runs.
    let pid_file = tmp.path().join(".guvnor/pids/web.pid");
    assert!(pid_file.exists());

    // Routed host whose backend serves nothing yields a bad gateway;
    // an unknown host is a routing miss.
    let proxy_addr = format!("127.0.0.1:{http_port}");
    let (status, body) = http_request(&proxy_addr, "GET", "web.localhost", "/x");
    assert_eq!(status, 502);
    assert_eq!(body, "Bad Gateway");
    let (status, body) = http_request(&proxy_addr, "GET", "zzz.localhost", "/");
    assert_eq!(status, 404);
    assert_eq!(body, "Domain not found");

    // Supervision events are visible through the log endpoints.
    let (status, body) = http_request(&mgmt_addr, "GET", "localhost", "/api/logs/web");
    assert_eq!(status, 200);
    assert!(body.contains("started"));

    // stop all children through the management API.
    let (status, body) = http_request(&mgmt_addr, "POST", "localhost", "/api/stop");
    assert_eq!(status, 200);
    assert!(body.contains("\"stopped\""));

    for _ in 0..100 {
        if !pid_file.exists() {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }
    assert!(!pid_file.exists(), "pid file should be gone after stop");

    let _ = server.kill();
    let _ = server.wait();
}

#[cfg(unix)]
#[test]
fn start_detaches_by_default() {
    let tmp = tempfile::tempdir().unwrap();
    let http_port = free_port();
    let backend_port = free_port();

    std::fs::write(
        tmp.path().join("guvnor.toml"),
        format!(
            r#"
[server]
http_port = {http_port}
shutdown_timeout_secs = 2

[[apps]]
name = "web"
hostname = "web.localhost"
port = {backend_port}
command = "sh"
args = ["-c", "sleep 120"]
"#
        ),
    )
    .unwrap();

    // The parent returns immediately; the supervisor keeps running.
    let output = guvnor(tmp.path())
        .args(["start", "--config", "guvnor.toml"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    assert!(stdout.contains("background"), "{stdout}");

    let supervisor_pid: u32 = stdout
        .split("(pid ")
        .nth(1)
        .and_then(|rest| rest.split(')').next())
        .and_then(|digits| digits.trim().parse().ok())
        .expect("background banner should carry the supervisor pid");

    let mgmt_addr = format!("127.0.0.1:{}", http_port + 1000);
    assert!(wait_for_listener(&mgmt_addr), "management api never came up");

    let (status, body) = http_request(&mgmt_addr, "GET", "localhost", "/api/status");
    assert_eq!(status, 200);
    assert!(body.contains("\"web\""));

    let (status, _) = http_request(&mgmt_addr, "POST", "localhost", "/api/stop");
    assert_eq!(status, 200);

    let _ = Command::new("kill")
        .arg(supervisor_pid.to_string())
        .status();
}

#[cfg(unix)]
#[test]
fn start_falls_back_to_procfile() {
    let tmp = tempfile::tempdir().unwrap();
    let http_port = free_port();

    std::fs::write(
        tmp.path().join("guvnor.toml"),
        format!("[server]\nhttp_port = {http_port}\n"),
    )
    .unwrap();
    std::fs::write(tmp.path().join("Procfile"), "worker: sleep 120\n").unwrap();

    let mut server = guvnor(tmp.path())
        .args(["start", "--config", "guvnor.toml", "--foreground"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mgmt_addr = format!("127.0.0.1:{}", http_port + 1000);
    assert!(wait_for_listener(&mgmt_addr), "management api never came up");

    let (status, body) = http_request(&mgmt_addr, "GET", "localhost", "/api/status");
    assert_eq!(status, 200);
    assert!(body.contains("\"worker\""));

    let (status, _) = http_request(&mgmt_addr, "POST", "localhost", "/api/stop");
    assert_eq!(status, 200);

    let _ = server.kill();
    let _ = server.wait();
}
