//! Integration test infrastructure: spawns real emberd instances and talks
//! to them over TCP.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A running emberd under test. Killed on drop.
pub struct TestServer {
    child: Child,
    pub port: u16,
    data_dir: PathBuf,
}

impl TestServer {
    /// Spawn with the default test configuration.
    pub async fn spawn(port: u16) -> TestServer {
        Self::spawn_with(port, "").await
    }

    /// Spawn with extra TOML appended to the test configuration.
    pub async fn spawn_with(port: u16, extra: &str) -> TestServer {
        let data_dir = std::env::temp_dir().join(format!("emberd-test-{port}"));
        let _ = std::fs::remove_dir_all(&data_dir);
        std::fs::create_dir_all(&data_dir).expect("create test dir");

        let config_path = data_dir.join("emberd.toml");
        let config = render_config(port, &data_dir, "rfc1459", extra);
        std::fs::write(&config_path, config).expect("write test config");

        let child = Command::new(env!("CARGO_BIN_EXE_emberd"))
            .arg("--nofork")
            .arg("--quiet")
            .arg("--config")
            .arg(&config_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn emberd");

        let server = TestServer {
            child,
            port,
            data_dir,
        };
        server.wait_until_listening().await;
        server
    }

    async fn wait_until_listening(&self) {
        let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;
        loop {
            if TcpStream::connect(("127.0.0.1", self.port)).await.is_ok() {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "server did not start listening on {}",
                self.port
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn xline_db_path(&self) -> PathBuf {
        self.data_dir.join("xlines.db")
    }

    /// Rewrite the config with a different casemap, for REHASH tests.
    pub fn rewrite_config_with_casemap(&self, casemap: &str) {
        let config = render_config(self.port, &self.data_dir, casemap, "");
        std::fs::write(self.data_dir.join("emberd.toml"), config).expect("rewrite test config");
    }
}

fn render_config(port: u16, data_dir: &std::path::Path, casemap: &str, extra: &str) -> String {
    let xline_db = data_dir.join("xlines.db");
    format!(
        r#"
[server]
name = "irc.example.net"
sid = "001"
network = "EmberNet"
description = "test server"
casemap = "{casemap}"

[[listen]]
addr = "127.0.0.1"
port = {port}

[[class]]
name = "default"
hosts = ["*"]
max_conns_per_ip = 64
resolve_hostnames = false
lookup_ident = false
penalty_ceiling_ms = 1000000

[xline]
db_path = "{xline_db}"
save_interval_secs = 1

[motd]
lines = ["welcome to the test server"]

[[oper]]
name = "root"
password = "opersecret"
hosts = ["*"]

{extra}
"#,
        xline_db = xline_db.display(),
    )
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

/// One IRC client connection.
pub struct TestClient {
    reader: Lines<BufReader<ReadHalf<TcpStream>>>,
    writer: WriteHalf<TcpStream>,
}

impl TestClient {
    pub async fn connect(port: u16) -> TestClient {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("connect to test server");
        let (read_half, writer) = tokio::io::split(stream);
        TestClient {
            reader: BufReader::new(read_half).lines(),
            writer,
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("write to server");
    }

    /// Next line from the server, failing the test on timeout or EOF.
    pub async fn recv(&mut self) -> String {
        match timeout(READ_TIMEOUT, self.reader.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => panic!("server closed the connection"),
            Ok(Err(e)) => panic!("read error: {e}"),
            Err(_) => panic!("timed out waiting for a line"),
        }
    }

    /// Next line, or None on timeout/EOF. For asserting silence.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<String> {
        match timeout(wait, self.reader.next_line()).await {
            Ok(Ok(Some(line))) => Some(line),
            _ => None,
        }
    }

    /// Read until a line satisfies `pred`; returns it.
    pub async fn wait_for(&mut self, pred: impl Fn(&str) -> bool) -> String {
        let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for expected line"
            );
            let line = self.recv().await;
            if pred(&line) {
                return line;
            }
        }
    }

    /// Shorthand: wait for a numeric reply.
    pub async fn wait_for_numeric(&mut self, numeric: &str) -> String {
        let needle = format!(" {numeric} ");
        self.wait_for(|line| line.contains(&needle)).await
    }

    /// Register with NICK/USER and wait out the welcome burst.
    pub async fn register(&mut self, nick: &str) {
        self.send(&format!("NICK {nick}")).await;
        self.send(&format!("USER {nick} 0 * :{nick} test")).await;
        self.wait_for_numeric("376").await;
    }

    /// Register and join one channel, draining the join burst.
    pub async fn register_and_join(&mut self, nick: &str, channel: &str) {
        self.register(nick).await;
        self.send(&format!("JOIN {channel}")).await;
        self.wait_for_numeric("366").await;
    }
}
