//! Scores produced by external programs.
//!
//! The configured command runs with three extra arguments: the result file,
//! the dataset name and the split. It must print its score as a fraction in
//! `[0, 1]` on the last non-empty stdout line.

use anyhow::{Context, Result, anyhow, bail};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

pub const SCORER_TIMEOUT: Duration = Duration::from_secs(3600);

pub fn run_scorer(
    command: &str,
    result_file: &Path,
    dataset_name: &str,
    split: &str,
    timeout: Duration,
) -> Result<f64> {
    let argv = shell_words::split(command)
        .with_context(|| format!("cannot parse scorer command `{command}`"))?;
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("scorer command is empty"))?;

    let mut child = Command::new(program)
        .args(args)
        .arg(result_file)
        .arg(dataset_name)
        .arg(split)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to start scorer `{program}`"))?;

    // Drain both pipes while waiting so a chatty scorer cannot fill them and stall.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let Some(status) = child.wait_timeout(timeout)? else {
        child.kill()?;
        let _ = child.wait();
        bail!("scorer `{program}` timed out after {}s", timeout.as_secs());
    };
    let stdout = collect(stdout)?;
    let stderr = collect(stderr)?;
    if !status.success() {
        bail!("scorer `{program}` exited with {status}: {}", stderr.trim());
    }
    parse_score(&stdout).map(|fraction| fraction * 100.0)
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect(reader: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<String> {
    let bytes = reader
        .join()
        .map_err(|_| anyhow!("scorer output reader panicked"))??;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn parse_score(stdout: &str) -> Result<f64> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("scorer printed nothing"))?;
    let value: f64 = line
        .parse()
        .with_context(|| format!("scorer output `{line}` is not a number"))?;
    if !value.is_finite() {
        bail!("scorer output `{line}` is not finite");
    }
    Ok(value)
}
