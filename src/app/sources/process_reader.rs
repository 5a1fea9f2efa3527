// DbgMux - app/sources/process_reader.rs
//
// Runs a child process and captures its stdout and stderr.
//
// Output is forwarded as raw fragments exactly as read from the pipes, each
// carrying the child's process handle, so newline reassembly and the
// termination notice are handled by the orchestrator. The transport is always
// a vector buffer because process handles cannot cross the ring transport.

use super::{take_utf8, LineSink, LogSource};
use crate::core::clock::Timer;
use crate::core::line_buffer::VectorLineBuffer;
use crate::core::model::{Line, SourceKind};
use crate::core::process::ProcessHandle;
use crate::core::signal::WaitHandle;
use crate::platform::process::{spawn_captured, ChildKiller};
use crate::util::constants::PIPE_READ_CHUNK_SIZE;
use crate::util::error::SourceError;
use chrono::Utc;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug)]
pub struct ProcessSource {
    command_line: String,
    handle: ProcessHandle,
    sink: LineSink,
    open_pipes: Arc<AtomicUsize>,
    killer: ChildKiller,
}

impl ProcessSource {
    /// Spawn the child immediately; output produced before the source is
    /// initialised is buffered.
    pub fn spawn(program: &str, args: &[String], timer: Timer) -> Result<Self, SourceError> {
        let sink = LineSink::new(Arc::new(VectorLineBuffer::new()), timer);
        let mut child = spawn_captured(program, args)?;
        let handle = child.handle.clone();

        let readers: Vec<Box<dyn Read + Send>> = [
            child.stdout.take().map(|p| Box::new(p) as Box<dyn Read + Send>),
            child.stderr.take().map(|p| Box::new(p) as Box<dyn Read + Send>),
        ]
        .into_iter()
        .flatten()
        .collect();

        let open_pipes = Arc::new(AtomicUsize::new(readers.len()));
        let mut threads: Vec<JoinHandle<()>> = Vec::with_capacity(readers.len());
        for (index, pipe) in readers.into_iter().enumerate() {
            let sink = sink.clone();
            let process = handle.clone();
            let open = Arc::clone(&open_pipes);
            let thread = std::thread::Builder::new()
                .name(format!("dbgmux-pipe-{}-{index}", handle.pid()))
                .spawn(move || {
                    read_pipe(pipe, &sink, &process);
                    open.fetch_sub(1, Ordering::SeqCst);
                    sink.signal();
                })
                .map_err(|e| SourceError::Spawn {
                    program: program.to_string(),
                    source: e,
                })?;
            threads.push(thread);
        }

        // Exit is reported only after both pipes reached EOF, so every
        // fragment is queued before the orchestrator hears of the exit.
        let killer = child
            .watch(move || {
                for thread in threads {
                    let _ = thread.join();
                }
            })
            .map_err(|e| SourceError::Spawn {
                program: program.to_string(),
                source: e,
            })?;

        let mut command_line = program.to_string();
        for arg in args {
            command_line.push(' ');
            command_line.push_str(arg);
        }
        Ok(Self {
            command_line,
            handle,
            sink,
            open_pipes,
            killer,
        })
    }

    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }
}

impl LogSource for ProcessSource {
    fn description(&self) -> String {
        format!("{} (pid {})", self.command_line, self.handle.pid())
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Process
    }

    fn process(&self) -> Option<ProcessHandle> {
        Some(self.handle.clone())
    }

    fn wait_handle(&self) -> Option<WaitHandle> {
        Some(self.sink.wait_handle())
    }

    fn notify(&mut self, out: &mut Vec<Line>) -> Result<(), SourceError> {
        self.sink.drain_into(out);
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.open_pipes.load(Ordering::SeqCst) == 0 && self.sink.is_empty()
    }

    fn abort(&mut self) {
        if !self.handle.has_exited() {
            tracing::info!(pid = self.handle.pid(), "Killing captured process");
            self.killer.kill();
        }
    }
}

fn read_pipe(mut pipe: Box<dyn Read + Send>, sink: &LineSink, process: &ProcessHandle) {
    let mut buf = vec![0u8; PIPE_READ_CHUNK_SIZE];
    let mut carry: Vec<u8> = Vec::new();
    loop {
        let n = match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(pid = process.pid(), error = %e, "Pipe read failed");
                break;
            }
        };
        carry.extend_from_slice(&buf[..n]);
        let text = take_utf8(&mut carry);
        if text.is_empty() {
            continue;
        }
        let line = Line::new(sink.timer().get(), Utc::now(), process.pid(), process.name(), text)
            .with_process(process.clone());
        if let Err(e) = sink.push(line) {
            tracing::warn!(pid = process.pid(), error = %e, "Process output dropped");
        }
    }
    if !carry.is_empty() {
        let text = String::from_utf8_lossy(&carry).into_owned();
        let line = Line::new(sink.timer().get(), Utc::now(), process.pid(), process.name(), text)
            .with_process(process.clone());
        let _ = sink.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_reported() {
        let result = ProcessSource::spawn("/no/such/program", &[], Timer::new());
        assert!(matches!(result, Err(SourceError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_output_and_ends() {
        let mut src = ProcessSource::spawn(
            "sh",
            &["-c".to_string(), "printf 'out\\n'; printf 'err' >&2".to_string()],
            Timer::new(),
        )
        .unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut out = Vec::new();
        while !src.handle().has_exited() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        src.notify(&mut out).unwrap();
        assert!(src.at_end());
        let text: String = {
            let mut parts: Vec<_> = out.iter().map(|l| l.message.clone()).collect();
            parts.sort();
            parts.concat()
        };
        assert_eq!(text, "errout\n");
        assert!(out.iter().all(|l| l.process.is_some()));
    }
}
