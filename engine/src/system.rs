//! Running external programs on behalf of a back end.
use crate::backend::CancelToken;
use crate::errors::{RuntimeError, RuntimeResult};
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs `command` with `stdin` as its input and returns its standard output.
/// The child is killed if `cancel` is set before it exits.
pub fn execute(
    command: &[String],
    stdin: &[u8],
    cancel: &CancelToken,
) -> RuntimeResult<String> {
    let Some((program, args)) = command.split_first() else {
        return Err(
            RuntimeError::Unsupported("empty command".to_string()).into()
        );
    };
    cancel.check()?;
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let input = stdin.to_vec();
    let mut sink = child.stdin.take();
    let writer = thread::spawn(move || {
        if let Some(sink) = sink.as_mut() {
            // the child may exit without reading all of it
            let _ = sink.write_all(&input);
        }
    });
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out = thread::spawn(move || drain(stdout));
    let err = thread::spawn(move || drain(stderr));

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.is_cancelled() {
            // the child may have exited in the meantime
            let _ = child.kill();
            let _ = child.wait();
            return Err(RuntimeError::Cancelled.into());
        }
        thread::sleep(POLL_INTERVAL);
    };
    let _ = writer.join();
    let stdout = out.join().unwrap_or_default();
    let stderr = err.join().unwrap_or_default();
    if status.success() {
        Ok(stdout)
    } else {
        Err(RuntimeError::CommandFailed {
            command: command.join(" "),
            status: status.code().unwrap_or(-1),
            stderr: stderr.trim_end().to_string(),
        }
        .into())
    }
}

fn drain<R: Read>(pipe: Option<R>) -> String {
    let mut text = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut text);
    }
    text
}
