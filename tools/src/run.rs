use std::{fs::File, io::Write, path::PathBuf, time::Duration};

use anyhow::{Context as _, Result};
use clap::Parser;
use cmd::{Context, Runner};
use reaper::Reaper;

use crate::config::CONFIG;

#[derive(Debug, Parser)]
pub struct Run {
    /// kill the command after SECS seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    /// feed the file to the standard input of the command
    #[arg(long)]
    stdin: Option<PathBuf>,

    /// program and its arguments
    #[arg(required = true, trailing_var_arg = true)]
    command: Vec<String>,
}

/// map the outcome of a command to the exit code of this process
fn exit_code(err: &cmd::Error) -> i32 {
    match (err.exit_code(), err.signal()) {
        (Some(code), _) => code,
        (None, Some(signo)) => 128 + signo,
        (None, None) => 1,
    }
}

pub async fn run(v: Run) -> Result<i32> {
    let mut ctx = Context::background();
    if let Some(path) = &v.stdin {
        let file = File::open(path).with_context(|| format!("open stdin {:?}", path))?;
        ctx = ctx.with_stdin(file);
    }
    if let Some(timeout) = v.timeout.map(Duration::from_secs).or(CONFIG.timeout()) {
        ctx = ctx.with_timeout(timeout);
    }

    let (program, args) = v
        .command
        .split_first()
        .context("no command to run")?;

    let reaper = Reaper::new(CONFIG.reaper.clone());
    reaper.start().await?;

    let result = Runner::with_reaper(reaper.clone())
        .run_context(ctx, program, args)
        .await;

    reaper.stop().await;

    let (stdout, code) = match &result {
        Ok(stdout) => (stdout.as_str(), 0),
        Err(err) => (err.stdout().unwrap_or_default(), exit_code(err)),
    };
    let mut out = std::io::stdout().lock();
    out.write_all(stdout.as_bytes())?;
    out.flush()?;

    if let Err(err) = &result {
        eprintln!("{}", err);
    }
    Ok(code)
}
