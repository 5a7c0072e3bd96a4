use std::ffi::OsStr;
use std::io::Read;
use std::net::TcpListener;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Spawn the `fleetload` binary with its output discarded.
///
/// # Errors
///
/// Returns an error if the process cannot be started.
pub fn spawn_fleetload<I, S>(args: I) -> Result<Child, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(fleetload_bin()?)
        .args(args)
        .env("FLEETLOAD_LOG", "error")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| format!("spawn fleetload failed: {}", err))
}

/// Spawn the `fleetload` binary and capture its output.
///
/// # Errors
///
/// Returns an error if the process cannot be started.
pub fn spawn_fleetload_with_output<I, S>(args: I) -> Result<Child, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(fleetload_bin()?)
        .args(args)
        .env("FLEETLOAD_LOG", "error")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| format!("spawn fleetload failed: {}", err))
}

/// Wait for a child process to exit, killing it after `timeout`.
///
/// # Errors
///
/// Returns an error if waiting fails or the timeout is exceeded.
pub fn wait_for_exit(child: &mut Child, timeout: Duration) -> Result<ExitStatus, String> {
    let start = Instant::now();
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|err| format!("wait failed: {}", err))?
        {
            return Ok(status);
        }
        if start.elapsed() > timeout {
            drop(child.kill());
            return Err("process timed out".to_owned());
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Read captured stdout/stderr from a child.
///
/// # Errors
///
/// Returns an error if the streams cannot be read.
pub fn read_child_output(child: &mut Child) -> Result<(String, String), String> {
    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_string(&mut stdout)
            .map_err(|err| format!("read stdout failed: {}", err))?;
    }
    let mut stderr = String::new();
    if let Some(mut err_out) = child.stderr.take() {
        err_out
            .read_to_string(&mut stderr)
            .map_err(|err| format!("read stderr failed: {}", err))?;
    }
    Ok((stdout, stderr))
}

/// Pick an available local TCP port.
///
/// # Errors
///
/// Returns an error if a local port cannot be allocated.
pub fn pick_port() -> Result<u16, String> {
    TcpListener::bind("127.0.0.1:0")
        .map_err(|err| format!("bind port failed: {}", err))?
        .local_addr()
        .map_err(|err| format!("port addr failed: {}", err))
        .map(|addr| addr.port())
}

/// First `label` line of a summary, parsed as a number.
///
/// # Errors
///
/// Returns an error when the line is missing or not numeric.
pub fn parse_summary_metric(output: &str, label: &str) -> Result<u64, String> {
    for line in output.lines() {
        if let Some(rest) = line.strip_prefix(label) {
            let number = rest.split_whitespace().next().unwrap_or("");
            return number
                .parse::<u64>()
                .map_err(|err| format!("Failed to parse {}: {}", label, err));
        }
    }
    Err(format!("Missing {} in output.", label))
}

fn fleetload_bin() -> Result<String, String> {
    option_env!("CARGO_BIN_EXE_fleetload").map_or_else(
        || Err("CARGO_BIN_EXE_fleetload missing at compile time.".to_owned()),
        |path| Ok(path.to_owned()),
    )
}
